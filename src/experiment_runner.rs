use crate::{
    arguments::{ArgumentBuilder, ArgumentSet},
    datastore::StateReset,
    errors::{HarnessError, HarnessResult},
    load_generator::{LoadGenerator, UserPayload},
    process_control::{ProcessSupervisor, Redirect, Role, RunningServices, ServiceCommand},
    stats::{self, ExperimentResult},
    variant::{ExperimentVariant, QueueAlgorithm, Selector, Strategy},
};
use chrono::Utc;
use colored::Colorize;
use serde::Serialize;
use std::{fmt, path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

/// The named experiments, one per swept axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentKind {
    /// One backend measured directly, without a load manager.
    Baseline,
    /// Does adding backends improve performance?
    Scaling,
    /// Which queue algorithm is the best?
    Algorithm,
    /// Which selector is the best?
    Selector,
    /// Which strategy is the best?
    Strategy,
}
impl ExperimentKind {
    pub fn axis(&self) -> &'static str {
        match self {
            ExperimentKind::Baseline => "baseline",
            ExperimentKind::Scaling => "nodes",
            ExperimentKind::Algorithm => "algorithm",
            ExperimentKind::Selector => "selector",
            ExperimentKind::Strategy => "strategy",
        }
    }
}
impl fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExperimentKind::Baseline => "Baseline",
            ExperimentKind::Scaling => "Scaling",
            ExperimentKind::Algorithm => "Algorithm",
            ExperimentKind::Selector => "Selector",
            ExperimentKind::Strategy => "Strategy",
        };
        write!(f, "{name}")
    }
}

/// An ordered set of variants measured under one experiment, each paired with the value of the
/// swept parameter.
#[derive(Debug, Clone)]
pub struct Sweep {
    kind: ExperimentKind,
    variants: Vec<(String, ExperimentVariant)>,
}
impl Sweep {
    fn new(kind: ExperimentKind, variants: Vec<(String, ExperimentVariant)>) -> HarnessResult<Self> {
        if variants.is_empty() {
            return Err(HarnessError::InvalidVariant(format!(
                "{kind} sweep has no values to sweep over"
            )));
        }
        Ok(Self { kind, variants })
    }

    pub fn baseline(base: ExperimentVariant) -> HarnessResult<Self> {
        let variant = base.with_node_count(1)?;
        Self::new(ExperimentKind::Baseline, vec![("single".to_string(), variant)])
    }

    pub fn scaling(base: ExperimentVariant, node_counts: &[usize]) -> HarnessResult<Self> {
        let variants = node_counts
            .iter()
            .map(|n| Ok((n.to_string(), base.with_node_count(*n)?)))
            .collect::<HarnessResult<Vec<_>>>()?;
        Self::new(ExperimentKind::Scaling, variants)
    }

    pub fn algorithm(base: ExperimentVariant, algorithms: &[QueueAlgorithm]) -> HarnessResult<Self> {
        let variants = algorithms
            .iter()
            .map(|a| (a.to_string(), base.with_queue_algorithm(*a)))
            .collect();
        Self::new(ExperimentKind::Algorithm, variants)
    }

    pub fn selector(base: ExperimentVariant, selectors: &[Selector]) -> HarnessResult<Self> {
        let variants = selectors
            .iter()
            .map(|s| (s.to_string(), base.with_selector(*s)))
            .collect();
        Self::new(ExperimentKind::Selector, variants)
    }

    pub fn strategy(base: ExperimentVariant, strategies: &[Strategy]) -> HarnessResult<Self> {
        let variants = strategies
            .iter()
            .map(|s| (s.to_string(), base.with_strategy(*s)))
            .collect();
        Self::new(ExperimentKind::Strategy, variants)
    }

    pub fn kind(&self) -> ExperimentKind {
        self.kind
    }

    pub fn axis(&self) -> &'static str {
        self.kind.axis()
    }

    pub fn variants(&self) -> &[(String, ExperimentVariant)] {
        &self.variants
    }

    /// Baseline sweeps talk to the single backend directly.
    pub fn bypasses_load_manager(&self) -> bool {
        self.kind == ExperimentKind::Baseline
    }
}

/// How to launch one kind of service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub command: String,
    pub dir: PathBuf,
    pub redirect: Redirect,
}

/// Everything the runner needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub backend: ServiceConfig,
    pub load_manager: ServiceConfig,
    pub load_manager_host: String,
    pub load_manager_port: u16,
    /// Where requests go when the load manager is in front of the backends.
    pub target_url: String,
    /// Where requests go for the baseline experiment.
    pub baseline_url: String,
    pub requests_per_variant: usize,
    pub request_timeout: Duration,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Resetting,
    Starting,
    Measuring,
    TearingDown,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VariantOutcome {
    Completed(ExperimentResult),
    Failed { kind: String, error: String },
}
impl From<HarnessResult<ExperimentResult>> for VariantOutcome {
    fn from(res: HarnessResult<ExperimentResult>) -> Self {
        match res {
            Ok(result) => VariantOutcome::Completed(result),
            Err(err) => VariantOutcome::Failed {
                kind: err.kind().to_string(),
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantRecord {
    pub parameter: String,
    pub variant: ExperimentVariant,
    pub outcome: VariantOutcome,
}
impl VariantRecord {
    pub fn result(&self) -> Option<&ExperimentResult> {
        match &self.outcome {
            VariantOutcome::Completed(result) => Some(result),
            VariantOutcome::Failed { .. } => None,
        }
    }
}

/// The outcome of a whole sweep, in variant order.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSet {
    pub run_id: String,
    pub experiment_name: String,
    pub axis: String,
    pub start_time: i64,
    pub stop_time: i64,
    pub results: Vec<VariantRecord>,
}
impl ExperimentSet {
    pub fn completed(&self) -> impl Iterator<Item = (&str, &ExperimentResult)> {
        self.results
            .iter()
            .filter_map(|r| r.result().map(|res| (r.parameter.as_str(), res)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &VariantRecord> {
        self.results.iter().filter(|r| r.result().is_none())
    }
}

/// Drives a sweep: for every variant reset the datastore, start the services, measure, reduce
/// and tear the services down again.
pub struct ExperimentRunner {
    settings: RunnerSettings,
    builder: ArgumentBuilder,
    supervisor: ProcessSupervisor,
    generator: LoadGenerator,
    state_reset: Box<dyn StateReset>,
    state: RunnerState,
}
impl ExperimentRunner {
    pub fn new(
        settings: RunnerSettings,
        builder: ArgumentBuilder,
        supervisor: ProcessSupervisor,
        state_reset: Box<dyn StateReset>,
    ) -> Self {
        Self {
            settings,
            builder,
            supervisor,
            generator: LoadGenerator::new(),
            state_reset,
            state: RunnerState::Idle,
        }
    }

    pub fn with_generator(mut self, generator: LoadGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Argument sets for every variant of `sweep`, without side effects.
    pub fn plan(&self, sweep: &Sweep) -> HarnessResult<Vec<ArgumentSet>> {
        sweep
            .variants()
            .iter()
            .map(|(_, variant)| self.builder.build(variant))
            .collect()
    }

    /// Runs every variant of `sweep` in order.
    ///
    /// # Returns
    ///
    /// The experiment set, with failed variants recorded in their slot. Only sweep-fatal errors
    /// (an unencodable variant or a failed datastore reset) are returned as `Err`, in which case
    /// nothing is reported for any variant.
    pub async fn run(&mut self, sweep: &Sweep) -> HarnessResult<ExperimentSet> {
        // configuration errors must surface before anything is spawned
        let plans = self.plan(sweep)?;

        let run_id = nanoid::nanoid!(5);
        let start_time = Utc::now().timestamp_millis();
        let total = sweep.variants().len();
        let mut results = Vec::with_capacity(total);

        info!("Starting {} sweep {} over {}", sweep.kind(), run_id, sweep.axis());
        for (i, ((parameter, variant), args)) in sweep.variants().iter().zip(plans).enumerate() {
            println!(
                "> running {} = {} ({}/{})",
                sweep.axis(),
                parameter.green(),
                i + 1,
                total
            );

            self.transition(RunnerState::Resetting);
            if let Err(err) = self.state_reset.reset().await {
                self.transition(RunnerState::Failed);
                return Err(match err {
                    err @ HarnessError::DatastoreResetFailure(_) => err,
                    other => HarnessError::DatastoreResetFailure(other.to_string()),
                });
            }

            let res = self
                .run_variant(&args, sweep.bypasses_load_manager())
                .await
                .map(|result| result.labelled(format!("{}={}", sweep.axis(), parameter)));

            match &res {
                Ok(result) => println!(
                    "\t{} throughput {:.4} req/ms, p95 {:.2}ms",
                    "✓".green(),
                    result.throughput,
                    result.p95
                ),
                Err(err) => {
                    warn!("{} = {} failed: {}", sweep.axis(), parameter, err);
                    println!("\t{} {}", "✗".red(), err.to_string().bright_black());
                }
            }

            results.push(VariantRecord {
                parameter: parameter.clone(),
                variant: *variant,
                outcome: res.into(),
            });
        }

        Ok(ExperimentSet {
            run_id,
            experiment_name: sweep.kind().to_string(),
            axis: sweep.axis().to_string(),
            start_time,
            stop_time: Utc::now().timestamp_millis(),
            results,
        })
    }

    /// Starts, measures and always tears down one variant.
    async fn run_variant(
        &mut self,
        args: &ArgumentSet,
        bypass_load_manager: bool,
    ) -> HarnessResult<ExperimentResult> {
        self.transition(RunnerState::Starting);
        let mut services = RunningServices::new();
        let res = self
            .start_and_measure(&mut services, args, bypass_load_manager)
            .await;

        self.transition(RunnerState::TearingDown);
        for err in services.stop_all(&self.supervisor).await {
            warn!("Teardown: {}", err);
        }

        self.transition(RunnerState::Idle);
        res
    }

    async fn start_and_measure(
        &mut self,
        services: &mut RunningServices,
        args: &ArgumentSet,
        bypass_load_manager: bool,
    ) -> HarnessResult<ExperimentResult> {
        let settings = &self.settings;

        for (i, (argv, endpoint)) in args
            .backend_args
            .iter()
            .zip(args.backend_endpoints.iter())
            .enumerate()
        {
            let command = ServiceCommand::new(
                &format!("backend-{i}"),
                &settings.backend.command,
                argv,
                &settings.backend.dir,
                settings.backend.redirect,
            )?;
            services.push(self.supervisor.start(
                &command,
                Role::Backend,
                &endpoint.host,
                Some(endpoint.port),
            )?);
        }

        // readiness is best effort: a slow service shows up as failed requests
        for (handle, endpoint) in services
            .handles_mut()
            .iter_mut()
            .zip(args.backend_endpoints.iter())
        {
            self.supervisor
                .wait_ready(
                    handle,
                    &endpoint.host,
                    endpoint.port,
                    settings.readiness_timeout,
                    settings.poll_interval,
                )
                .await;
        }

        let url = if bypass_load_manager {
            settings.baseline_url.clone()
        } else {
            let command = ServiceCommand::new(
                "load-manager",
                &settings.load_manager.command,
                &args.load_manager_args,
                &settings.load_manager.dir,
                settings.load_manager.redirect,
            )?;
            let handle = services.push(self.supervisor.start(
                &command,
                Role::LoadManager,
                &settings.load_manager_host,
                Some(settings.load_manager_port),
            )?);
            self.supervisor
                .wait_ready(
                    handle,
                    &settings.load_manager_host,
                    settings.load_manager_port,
                    settings.readiness_timeout,
                    settings.poll_interval,
                )
                .await;
            settings.target_url.clone()
        };

        self.transition(RunnerState::Measuring);
        let sample = self
            .generator
            .run(
                &url,
                self.settings.requests_per_variant,
                UserPayload::for_index,
                self.settings.request_timeout,
            )
            .await?;

        stats::reduce(&sample)
    }

    fn transition(&mut self, next: RunnerState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
