//! CLI argument parsing for taskscope

use crate::task::{SimId, TaskId};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "taskscope")]
#[command(version)]
#[command(about = "Query scheduling states and critical paths of task-parallel traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long)]
    pub debug: bool,

    /// Store configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Trace snapshot to load (JSON)
    #[arg(value_name = "SNAPSHOT")]
    pub snapshot: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Row counts, finalization issues and attached simulations
    Summary,

    /// Task rows with resolved attributes
    Tasks {
        /// Task ids (comma separated)
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<TaskId>,
    },

    /// Ordered lifecycle events of tasks
    History {
        /// Task ids (comma separated)
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<TaskId>,

        /// Read a simulated schedule instead of the real trace
        #[arg(long, value_name = "N")]
        sim: Option<SimId>,
    },

    /// Scheduling states reconstructed from lifecycle events
    States {
        /// Task ids (comma separated)
        #[arg(value_delimiter = ',', required = true)]
        ids: Vec<TaskId>,

        /// Read a simulated schedule instead of the real trace
        #[arg(long, value_name = "N")]
        sim: Option<SimId>,
    },

    /// Tasks on the critical path
    Critical {
        /// Start from this task instead of the configured root
        #[arg(long, value_name = "TASK")]
        root: Option<TaskId>,

        /// Read a simulated schedule instead of the real trace
        #[arg(long, value_name = "N")]
        sim: Option<SimId>,
    },

    /// Task counts per (label, create, start, end location)
    TaskTypes,

    /// Child counts per parent and child attributes
    ChildrenByParent,

    /// Every interned string
    Strings,

    /// Every source location, ordered by file and line
    Source,

    /// Row counts of each attached simulation
    Sims,

    /// Scheduling states of the top-level phase tasks with the work they spawned
    Phases {
        /// Read a simulated schedule instead of the real trace
        #[arg(long, value_name = "N")]
        sim: Option<SimId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_summary() {
        let cli = Cli::parse_from(["taskscope", "trace.json", "summary"]);
        assert_eq!(cli.snapshot, PathBuf::from("trace.json"));
        assert_eq!(cli.command, Command::Summary);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_comma_separated_ids() {
        let cli = Cli::parse_from(["taskscope", "trace.json", "states", "5,9,12", "--sim", "3"]);
        assert_eq!(
            cli.command,
            Command::States {
                ids: vec![5, 9, 12],
                sim: Some(3)
            }
        );
    }

    #[test]
    fn test_cli_critical_defaults() {
        let cli = Cli::parse_from(["taskscope", "--format", "json", "trace.json", "critical"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.command, Command::Critical { root: None, sim: None });
    }

    #[test]
    fn test_cli_config_flag() {
        let cli = Cli::parse_from([
            "taskscope",
            "--config",
            "store.toml",
            "--debug",
            "trace.json",
            "task-types",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("store.toml")));
        assert!(cli.debug);
        assert_eq!(cli.command, Command::TaskTypes);
    }

    #[test]
    fn test_cli_tasks_requires_ids() {
        assert!(Cli::try_parse_from(["taskscope", "trace.json", "tasks"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_ids() {
        assert!(Cli::try_parse_from(["taskscope", "trace.json", "history", "five"]).is_err());
    }

    #[test]
    fn test_cli_listing_commands() {
        let cli = Cli::parse_from(["taskscope", "trace.json", "source"]);
        assert_eq!(cli.command, Command::Source);
        let cli = Cli::parse_from(["taskscope", "trace.json", "phases", "--sim", "2"]);
        assert_eq!(cli.command, Command::Phases { sim: Some(2) });
    }
}
