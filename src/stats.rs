use crate::errors::{HarnessError, HarnessResult};
use itertools::Itertools;
use serde::Serialize;
use std::time::Duration;

/// Latencies (ms) of the successful requests of one load run, plus how many were attempted.
///
/// `succeeded()` is always the number of recorded latencies and never exceeds `attempted()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySample {
    latencies_ms: Vec<f64>,
    attempted: usize,
}
impl LatencySample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            latencies_ms: Vec::with_capacity(capacity),
            attempted: 0,
        }
    }

    /// Builds a sample from already measured latencies.
    pub fn from_latencies(latencies_ms: Vec<f64>, attempted: usize) -> HarnessResult<Self> {
        if latencies_ms.len() > attempted {
            return Err(HarnessError::DegenerateSample(format!(
                "{} successes recorded but only {} attempted",
                latencies_ms.len(),
                attempted
            )));
        }
        if let Some(bad) = latencies_ms.iter().find(|l| !l.is_finite() || **l < 0.0) {
            return Err(HarnessError::DegenerateSample(format!(
                "latency {bad} is not a non-negative number"
            )));
        }

        Ok(Self {
            latencies_ms,
            attempted,
        })
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.attempted += 1;
        self.latencies_ms.push(elapsed.as_nanos() as f64 / 1_000_000.0);
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn succeeded(&self) -> usize {
        self.latencies_ms.len()
    }

    pub fn latencies_ms(&self) -> &[f64] {
        &self.latencies_ms
    }
}

/// Throughput and latency summary of one variant. Times are in milliseconds, throughput in
/// successful requests per millisecond of accumulated request time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentResult {
    pub label: String,
    pub throughput: f64,
    pub avg_latency: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub total_time: f64,
    pub attempted: usize,
    pub succeeded: usize,
}
impl ExperimentResult {
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Index of the `q` quantile in a sorted sample of length `n`, i.e. `floor(n * q)` clamped to the
/// last element.
fn quantile_index(n: usize, q: f64) -> usize {
    ((n as f64 * q).floor() as usize).min(n.saturating_sub(1))
}

/// Reduces a sample into its summary. The label is left empty for the caller to fill in.
///
/// Fails with `DegenerateSample` when the sample is empty or its latencies sum to zero, since
/// throughput would be undefined.
pub fn reduce(sample: &LatencySample) -> HarnessResult<ExperimentResult> {
    let n = sample.succeeded();
    if n == 0 {
        return Err(HarnessError::DegenerateSample(
            "sample contains no latencies".to_string(),
        ));
    }

    let sorted = sample
        .latencies_ms()
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();

    let total_time: f64 = sorted.iter().sum();
    if !total_time.is_finite() || total_time <= 0.0 {
        return Err(HarnessError::DegenerateSample(format!(
            "total time {total_time} cannot be used to compute throughput"
        )));
    }

    Ok(ExperimentResult {
        label: String::new(),
        throughput: n as f64 / total_time,
        avg_latency: total_time / n as f64,
        p50: sorted[n / 2],
        p95: sorted[quantile_index(n, 0.95)],
        p99: sorted[quantile_index(n, 0.99)],
        min_latency: sorted[0],
        max_latency: sorted[n - 1],
        total_time,
        attempted: sample.attempted(),
        succeeded: n,
    })
}
