//! # Vigil CLI Module
//!
//! ## Available Commands
//!
//! - `train` - Run the full pipeline once
//! - `predict` - Predict a single record or a JSON file of records
//! - `registry` - Inspect published model versions
//! - `runs` - Inspect a pipeline run's artifacts and status

mod commands;

use crate::config::{DEFAULT_CONFIG_FILE, load_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vigil_core::VigilError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Vigil - gated training pipeline
///
/// Trains, validates and promotes models into a registry that never
/// publishes a regression.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline once
    Train,

    /// Predict with the latest published model
    Predict {
        /// A single raw record as a JSON object
        #[arg(short, long, conflicts_with = "input", required_unless_present = "input")]
        record: Option<String>,

        /// A JSON array of raw records
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Inspect the model registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Inspect pipeline runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum RegistryAction {
    /// List published versions
    List,
    /// Show the newest published version
    Latest,
    /// Show the member digests of one version
    Show {
        /// Version number
        version: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum RunsAction {
    /// Print a run's stage records and status
    Show {
        /// Run id (directory name under the artifact root)
        run_id: String,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
///
/// Returns the process exit code on completion.
pub fn execute(cli: Cli) -> Result<i32, VigilError> {
    let config = load_config(&cli.config)?;
    if cli.verbose {
        tracing::info!(config = %cli.config.display(), "configuration loaded");
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Train => cmd_train(config, json_mode),
        Commands::Predict { record, input } => match (record, input) {
            (_, Some(input)) => cmd_predict_file(&config, json_mode, &input).map(|()| 0),
            (Some(record), None) => cmd_predict_record(&config, json_mode, &record).map(|()| 0),
            (None, None) => Err(VigilError::ConfigError(
                "predict needs --record or --input".to_string(),
            )),
        },
        Commands::Registry { action } => match action {
            RegistryAction::List => cmd_registry_list(&config, json_mode),
            RegistryAction::Latest => cmd_registry_latest(&config, json_mode),
            RegistryAction::Show { version } => cmd_registry_show(&config, json_mode, version),
        }
        .map(|()| 0),
        Commands::Runs {
            action: RunsAction::Show { run_id },
        } => cmd_runs_show(&config, json_mode, &run_id).map(|()| 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn predict_requires_an_input() {
        assert!(Cli::try_parse_from(["vigil", "predict"]).is_err());
        assert!(
            Cli::try_parse_from(["vigil", "predict", "--record", "{}", "--input", "x.json"])
                .is_err()
        );
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "vigil",
            "registry",
            "show",
            "2",
            "--json-mode",
            "--config",
            "other.toml",
        ])
        .expect("parse");
        assert!(cli.json_mode);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(
            cli.command,
            Commands::Registry {
                action: RegistryAction::Show { version: 2 }
            }
        ));
    }
}
