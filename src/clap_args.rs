use crate::{config::DEFAULT_CONFIG_PATH, experiment_runner::ExperimentKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Runs load experiments against a load manager and its backends", long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },

    /// Run an experiment sweep
    Run {
        #[arg(value_enum)]
        experiment: ExperimentKind,

        /// Requests per variant, overrides the config file
        #[arg(short = 'n', long)]
        requests: Option<usize>,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Also write the results as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not truncate the datastore between variants
        #[arg(long)]
        no_reset: bool,
    },

    /// Print the command lines of every variant without starting anything
    Plan {
        #[arg(value_enum)]
        experiment: ExperimentKind,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "loadbench", "-vv", "run", "scaling", "-n", "50", "-o", "out.json", "--no-reset",
        ])?;

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                experiment,
                requests,
                config,
                output,
                no_reset,
            } => {
                assert_eq!(experiment, ExperimentKind::Scaling);
                assert_eq!(requests, Some(50));
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_PATH));
                assert_eq!(output, Some(PathBuf::from("out.json")));
                assert!(no_reset);
            }
            other => panic!("expected run, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn rejects_unknown_experiments() {
        assert!(Cli::try_parse_from(["loadbench", "run", "latency"]).is_err());
    }
}
