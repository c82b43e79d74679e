use crate::{
    arguments::{ArgumentBuilder, LoadManagerTuning, DEFAULT_BASE_PORT, DEFAULT_HOST},
    datastore::DEFAULT_TABLES,
    errors::{HarnessError, HarnessResult},
    experiment_runner::{ExperimentKind, RunnerSettings, ServiceConfig, Sweep},
    load_generator::target_url,
    process_control::{ProcessSupervisor, Redirect},
    variant::{ExperimentVariant, QueueAlgorithm, Selector, Strategy, Token},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

static EXAMPLE_CONFIG: &str = include_str!("templates/loadbench.toml");

pub const DEFAULT_CONFIG_PATH: &str = "./loadbench.toml";
pub const DEFAULT_REQUESTS: usize = 1000;

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_requests")]
    pub requests: usize,
    #[serde(default)]
    pub target: Target,
    pub backend: Backend,
    pub load_manager: LoadManager,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub teardown: Teardown,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub sweep: SweepValues,
    #[serde(default)]
    pub datastore: Datastore,
}
impl Config {
    /// Writes the example configuration to `path`. Fails if the file already exists.
    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)
            .with_context(|| format!("Unable to create {}", path.display()))?;
        file.write_all(EXAMPLE_CONFIG.as_bytes())?;
        Ok(file)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        let mut config_str = String::new();
        fs::File::open(path)
            .with_context(|| format!("Unable to open config file {}", path.display()))?
            .read_to_string(&mut config_str)?;
        Config::try_from_str(&config_str)
    }

    /// Parses and validates a configuration. Every token is checked here, so an unknown
    /// algorithm, selector or strategy is reported before anything is spawned.
    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        let config = toml::from_str::<Config>(conf_str)
            .map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))?;
        config.default_variant()?;
        config.sweep.algorithms()?;
        config.sweep.selectors()?;
        config.sweep.strategies()?;
        Ok(config)
    }

    /// The variant used for every axis that is not being swept.
    pub fn default_variant(&self) -> HarnessResult<ExperimentVariant> {
        ExperimentVariant::new(
            self.defaults.nodes,
            QueueAlgorithm::parse_token(&self.defaults.algorithm)?,
            Selector::parse_token(&self.defaults.selector)?,
            Strategy::parse_token(&self.defaults.strategy)?,
        )
    }

    pub fn sweep(&self, kind: ExperimentKind) -> HarnessResult<Sweep> {
        let base = self.default_variant()?;
        match kind {
            ExperimentKind::Baseline => Sweep::baseline(base),
            ExperimentKind::Scaling => Sweep::scaling(base, &self.sweep.nodes),
            ExperimentKind::Algorithm => Sweep::algorithm(base, &self.sweep.algorithms()?),
            ExperimentKind::Selector => Sweep::selector(base, &self.sweep.selectors()?),
            ExperimentKind::Strategy => Sweep::strategy(base, &self.sweep.strategies()?),
        }
    }

    pub fn argument_builder(&self) -> ArgumentBuilder {
        ArgumentBuilder::new(&self.backend.host, self.backend.base_port)
            .with_tuning(self.load_manager.tuning.clone())
    }

    pub fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(Duration::from_millis(self.teardown.grace_period_ms))
    }

    pub fn runner_settings(&self, requests: Option<usize>) -> RunnerSettings {
        RunnerSettings {
            backend: ServiceConfig {
                command: self.backend.command.clone(),
                dir: self.backend.dir.clone(),
                redirect: self.backend.redirect,
            },
            load_manager: ServiceConfig {
                command: self.load_manager.command.clone(),
                dir: self.load_manager.dir.clone(),
                redirect: self.load_manager.redirect,
            },
            load_manager_host: self.backend.host.clone(),
            load_manager_port: self.load_manager.port,
            target_url: target_url(&self.target.base_url, &self.target.route),
            baseline_url: target_url(&self.target.baseline_url, &self.target.route),
            requests_per_variant: requests.unwrap_or(self.requests),
            request_timeout: Duration::from_millis(self.target.request_timeout_ms),
            readiness_timeout: Duration::from_millis(self.readiness.timeout_ms),
            poll_interval: Duration::from_millis(self.readiness.poll_interval_ms),
        }
    }
}

fn default_requests() -> usize {
    DEFAULT_REQUESTS
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Target {
    pub base_url: String,
    pub route: String,
    pub baseline_url: String,
    pub request_timeout_ms: u64,
}
impl Default for Target {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/balancer".to_string(),
            route: "user".to_string(),
            baseline_url: "http://localhost:8080/single".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Backend {
    pub command: String,
    pub dir: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub redirect: Redirect,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoadManager {
    pub command: String,
    pub dir: PathBuf,
    #[serde(default = "default_load_manager_port")]
    pub port: u16,
    #[serde(flatten)]
    pub tuning: LoadManagerTuning,
    #[serde(default)]
    pub redirect: Redirect,
}

fn default_load_manager_port() -> u16 {
    8000
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Readiness {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}
impl Default for Readiness {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Teardown {
    pub grace_period_ms: u64,
}
impl Default for Teardown {
    fn default() -> Self {
        Self {
            grace_period_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Defaults {
    pub nodes: usize,
    pub algorithm: String,
    pub selector: String,
    pub strategy: String,
}
impl Default for Defaults {
    fn default() -> Self {
        Self {
            nodes: 4,
            algorithm: "FCFS".to_string(),
            selector: "RR".to_string(),
            strategy: "M".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SweepValues {
    pub nodes: Vec<usize>,
    pub algorithms: Vec<String>,
    pub selectors: Vec<String>,
    pub strategies: Vec<String>,
}
impl Default for SweepValues {
    fn default() -> Self {
        Self {
            nodes: vec![2, 4, 8, 16],
            algorithms: vec!["FCFS".to_string(), "RAND".to_string()],
            selectors: vec!["RR".to_string(), "R".to_string()],
            strategies: ["M", "PR", "PO", "PRO"].map(String::from).to_vec(),
        }
    }
}
impl SweepValues {
    pub fn algorithms(&self) -> HarnessResult<Vec<QueueAlgorithm>> {
        parse_all(&self.algorithms)
    }

    pub fn selectors(&self) -> HarnessResult<Vec<Selector>> {
        parse_all(&self.selectors)
    }

    pub fn strategies(&self) -> HarnessResult<Vec<Strategy>> {
        parse_all(&self.strategies)
    }
}

fn parse_all<T: Token>(values: &[String]) -> HarnessResult<Vec<T>> {
    values.iter().map(|v| T::parse_token(v)).collect()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Datastore {
    pub tables: Vec<String>,
}
impl Default for Datastore {
    fn default() -> Self {
        Self {
            tables: DEFAULT_TABLES.map(String::from).to_vec(),
        }
    }
}

/// Turns a parse failure of `path` into a configuration error.
pub fn load(path: &Path) -> HarnessResult<Config> {
    Config::try_from_path(path).map_err(|err| match err.downcast::<HarnessError>() {
        Ok(harness_err) => harness_err,
        Err(other) => HarnessError::Config(format!("{other:#}")),
    })
}
