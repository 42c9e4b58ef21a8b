//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::role::Role;

/// Dungeon - four processes, one shared state, two levers
#[derive(Parser)]
#[command(
    name = "dungeon",
    about = "Four-process dungeon crawl coordinated over shared memory, semaphores and signals",
    version,
    after_help = "Logs are written to: ~/.local/share/dungeon/logs/<process>.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    /// Subcommand to execute; runs the game when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Remove shared memory and levers left behind by a crashed run
    Clean,

    /// Internal: run as a worker process (spawned by the dungeon)
    #[command(hide = true)]
    Worker {
        /// Role to play
        #[arg(value_enum)]
        role: Role,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["dungeon"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_clean() {
        let cli = Cli::parse_from(["dungeon", "clean"]);
        assert!(matches!(cli.command, Some(Command::Clean)));
    }

    #[test]
    fn test_cli_parse_worker_with_global_options() {
        let cli = Cli::parse_from(["dungeon", "--config", "/tmp/d.yml", "--log-level", "debug", "worker", "rogue"]);
        assert!(matches!(cli.command, Some(Command::Worker { role: Role::Rogue })));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["dungeon", "worker", "bard"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
