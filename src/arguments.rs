use crate::{
    errors::{HarnessError, HarnessResult},
    variant::{ExperimentVariant, Token},
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_BASE_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Optional load manager flags which are passed through untouched when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoadManagerTuning {
    pub batch_size: Option<u32>,
    pub batch_timeout_ms: Option<u64>,
    pub workers: Option<u32>,
    #[serde(default)]
    pub levels: Vec<String>,
}

/// Argument vectors for one variant: one per backend node plus one for the load manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSet {
    pub backend_args: Vec<Vec<String>>,
    pub load_manager_args: Vec<String>,
    pub backend_endpoints: Vec<Endpoint>,
}

/// Pure builder for the command lines of the backends and the load manager. Node `i` listens on
/// `base_port + i`.
#[derive(Debug, Clone)]
pub struct ArgumentBuilder {
    host: String,
    base_port: u16,
    tuning: LoadManagerTuning,
}
impl Default for ArgumentBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_BASE_PORT)
    }
}
impl ArgumentBuilder {
    pub fn new(host: &str, base_port: u16) -> Self {
        Self {
            host: host.to_string(),
            base_port,
            tuning: LoadManagerTuning::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: LoadManagerTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn endpoint(&self, node_index: usize) -> HarnessResult<Endpoint> {
        let port = u16::try_from(node_index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or_else(|| {
                HarnessError::InvalidVariant(format!(
                    "node {} does not fit in the port range starting at {}",
                    node_index, self.base_port
                ))
            })?;

        Ok(Endpoint {
            host: self.host.clone(),
            port,
        })
    }

    /// Builds the argument vectors for every node of `variant` and for the load manager.
    ///
    /// The load manager receives one `-a host:port` per node in node order followed by `-q`, `-s`
    /// and `-l`, then any tuning flags.
    pub fn build(&self, variant: &ExperimentVariant) -> HarnessResult<ArgumentSet> {
        // encode first so a bad variant never yields a partial set
        let algorithm = variant.queue_algorithm().token()?;
        let selector = variant.selector().token()?;
        let strategy = variant.strategy().token()?;

        let backend_endpoints = (0..variant.node_count())
            .map(|i| self.endpoint(i))
            .collect::<HarnessResult<Vec<_>>>()?;

        let backend_args = backend_endpoints
            .iter()
            .map(|endpoint| {
                vec![
                    "--host".to_string(),
                    endpoint.host.clone(),
                    "--port".to_string(),
                    endpoint.port.to_string(),
                ]
            })
            .collect();

        let mut load_manager_args = Vec::with_capacity(backend_endpoints.len() * 2 + 6);
        for endpoint in backend_endpoints.iter() {
            load_manager_args.push("-a".to_string());
            load_manager_args.push(endpoint.to_string());
        }
        for (flag, token) in [("-q", algorithm), ("-s", selector), ("-l", strategy)] {
            load_manager_args.push(flag.to_string());
            load_manager_args.push(token.to_string());
        }
        self.push_tuning(&mut load_manager_args);

        Ok(ArgumentSet {
            backend_args,
            load_manager_args,
            backend_endpoints,
        })
    }

    fn push_tuning(&self, args: &mut Vec<String>) {
        let tuning = &self.tuning;
        if let Some(size) = tuning.batch_size {
            args.extend(["-b".to_string(), size.to_string()]);
        }
        if let Some(timeout) = tuning.batch_timeout_ms {
            args.extend(["-t".to_string(), timeout.to_string()]);
        }
        if let Some(workers) = tuning.workers {
            args.extend(["-w".to_string(), workers.to_string()]);
        }
        for level in tuning.levels.iter() {
            args.extend(["-v".to_string(), level.clone()]);
        }
    }
}
