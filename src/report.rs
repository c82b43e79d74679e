use crate::{
    experiment_runner::{ExperimentSet, VariantOutcome},
    stats::ExperimentResult,
};
use anyhow::Context;
use colored::Colorize;
use std::{fs::File, io::BufWriter, path::PathBuf};
use term_table::{row, row::Row, table_cell::*, Table, TableStyle};
use textplots::{Chart, Plot, Shape};
use tracing::info;

/// Somewhere an experiment set can be presented.
pub trait ReportSink {
    fn render(&self, set: &ExperimentSet) -> anyhow::Result<()>;
}

/// Prints a summary table to stdout, followed by charts of throughput and p95 across the sweep.
#[derive(Debug, Default, Clone)]
pub struct TableReport {
    pub chart: bool,
}
impl TableReport {
    pub fn new() -> Self {
        Self { chart: true }
    }

    pub fn table(set: &ExperimentSet) -> Table {
        let mut rows = vec![row![
            TableCell::builder(set.axis.to_string().bold()).build(),
            TableCell::builder("Throughput (req/ms)".bold()).build(),
            TableCell::builder("Avg (ms)".bold()).build(),
            TableCell::builder("p50 (ms)".bold()).build(),
            TableCell::builder("p95 (ms)".bold()).build(),
            TableCell::builder("p99 (ms)".bold()).build(),
            TableCell::builder("Succeeded".bold()).build()
        ]];

        for record in &set.results {
            let row: Row = match &record.outcome {
                VariantOutcome::Completed(res) => row![
                    TableCell::new(&record.parameter),
                    TableCell::new(format!("{:.4}", res.throughput)),
                    TableCell::new(format!("{:.2}", res.avg_latency)),
                    TableCell::new(format!("{:.2}", res.p50)),
                    TableCell::new(format!("{:.2}", res.p95)),
                    TableCell::new(format!("{:.2}", res.p99)),
                    TableCell::new(format!("{}/{}", res.succeeded, res.attempted))
                ],
                VariantOutcome::Failed { kind, .. } => row![
                    TableCell::new(&record.parameter),
                    TableCell::builder(format!("failed: {kind}").red())
                        .col_span(5)
                        .build(),
                    TableCell::new("--".bright_black())
                ],
            };
            rows.push(row);
        }

        Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build()
    }

    fn plot(set: &ExperimentSet) {
        let labels = set
            .completed()
            .enumerate()
            .map(|(i, (param, _))| format!("{}={}", i + 1, param))
            .collect::<Vec<_>>();
        if labels.len() < 2 {
            return;
        }

        let metrics: [(&str, fn(&ExperimentResult) -> f64); 2] = [
            ("Throughput (req/ms)", |res| res.throughput),
            ("p95 latency (ms)", |res| res.p95),
        ];
        for (title, metric) in metrics {
            let points = set
                .completed()
                .enumerate()
                .map(|(i, (_, res))| (i as f32 + 1.0, metric(res) as f32))
                .collect::<Vec<_>>();

            println!("\n{} ({})", title.green(), labels.join(", "));
            Chart::new(120, 40, 1.0, points.len() as f32)
                .lineplot(&Shape::Lines(&points))
                .display();
        }
    }
}
impl ReportSink for TableReport {
    fn render(&self, set: &ExperimentSet) -> anyhow::Result<()> {
        println!(
            "\n{} {} [{}]",
            format!(" {} ", set.experiment_name).reversed().green(),
            "summary".bold(),
            set.run_id
        );
        println!("{}", Self::table(set).render());

        for record in set.failures() {
            if let VariantOutcome::Failed { error, .. } = &record.outcome {
                println!("{} {}: {}", "✗".red(), record.parameter, error);
            }
        }

        if self.chart {
            Self::plot(set);
        }
        Ok(())
    }
}

/// Writes the experiment set as pretty printed JSON.
#[derive(Debug, Clone)]
pub struct JsonReport {
    path: PathBuf,
}
impl JsonReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}
impl ReportSink for JsonReport {
    fn render(&self, set: &ExperimentSet) -> anyhow::Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Unable to create report {}", self.path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), set)?;
        info!("Wrote report to {}", self.path.display());
        Ok(())
    }
}
