use anyhow::Context;
use colored::Colorize;
use loadbench::{
    clap_args::{self, Commands},
    config::{self, Config},
    datastore::{NoopReset, PostgresReset, StateReset},
    errors::HarnessError,
    experiment_runner::{ExperimentKind, ExperimentRunner},
    report::{JsonReport, ReportSink, TableReport},
};
use std::{path::Path, process::ExitCode};
use tracing::{error, Subscriber};
use tracing_subscriber::EnvFilter;

fn get_subscriber(env_filter: &str) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}

/// RUST_LOG wins, then `-v`, then the config file.
fn log_level(verbose: u8, config_level: Option<&str>) -> String {
    match verbose {
        0 => config_level.unwrap_or("warn").to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = clap_args::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: clap_args::Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            init_tracing(cli.verbose, None)?;
            Config::write_example_to_file(&path)?;
            println!("{} {}", "Wrote".green(), path.display());
        }

        Commands::Plan { experiment, config } => {
            let cfg = config::load(&config)?;
            init_tracing(cli.verbose, cfg.log_level.as_deref())?;
            plan(&cfg, experiment)?;
        }

        Commands::Run {
            experiment,
            requests,
            config,
            output,
            no_reset,
        } => {
            let cfg = config::load(&config)?;
            init_tracing(cli.verbose, cfg.log_level.as_deref())?;

            let state_reset: Box<dyn StateReset> = if no_reset {
                Box::new(NoopReset)
            } else {
                Box::new(PostgresReset::from_env(&cfg.datastore.tables)?)
            };

            let sweep = cfg.sweep(experiment)?;
            let mut runner = ExperimentRunner::new(
                cfg.runner_settings(requests),
                cfg.argument_builder(),
                cfg.supervisor(),
                state_reset,
            );

            let set = runner.run(&sweep).await.inspect_err(|err: &HarnessError| {
                if err.is_sweep_fatal() {
                    error!("Sweep aborted: {}", err);
                }
            })?;

            TableReport::new().render(&set)?;
            if let Some(path) = output {
                JsonReport::new(path).render(&set)?;
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, config_level: Option<&str>) -> anyhow::Result<()> {
    let level = log_level(verbose, config_level);
    tracing::subscriber::set_global_default(get_subscriber(&level))
        .context("Failed to set subscriber")
}

fn plan(cfg: &Config, experiment: ExperimentKind) -> anyhow::Result<()> {
    let sweep = cfg.sweep(experiment)?;
    let settings = cfg.runner_settings(None);
    let runner = ExperimentRunner::new(
        settings.clone(),
        cfg.argument_builder(),
        cfg.supervisor(),
        Box::new(NoopReset),
    );

    for ((parameter, variant), args) in sweep.variants().iter().zip(runner.plan(&sweep)?) {
        println!("{} = {}  ({})", sweep.axis(), parameter.green(), variant);
        for argv in &args.backend_args {
            println!(
                "\t{} {} {}",
                in_dir(&settings.backend.dir),
                settings.backend.command,
                shlex::try_join(argv.iter().map(String::as_str))?
            );
        }
        if !sweep.bypasses_load_manager() {
            println!(
                "\t{} {} {}",
                in_dir(&settings.load_manager.dir),
                settings.load_manager.command,
                shlex::try_join(args.load_manager_args.iter().map(String::as_str))?
            );
        }
    }
    Ok(())
}

fn in_dir(dir: &Path) -> String {
    format!("[{}]", dir.display()).bright_black().to_string()
}
