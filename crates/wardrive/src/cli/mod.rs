//! Command-line interface for wardrive.
//!
//! This module provides the CLI structure for the `wardrive` binary. Every
//! command is a thin wrapper over a library function; the binary only
//! renders the returned value.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    BackupsCommand, ConfigCommand, ExportCommand, MatchTypeArg, PhyArg, RulesCommand,
    SanitizeCommand, WatchModeArg,
};

use crate::logging::Verbosity;

/// wardrive - Clean and export wardriving captures
///
/// Removes devices you never want to publish (your own phone hotspot, a
/// car's Bluetooth) from Kismet captures, and exports what is left in the
/// WiGLE CSV format.
#[derive(Debug, Parser)]
#[command(name = "wardrive")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export captures as WiGLE CSV
    Export(ExportCommand),

    /// Remove excluded devices from captures
    #[command(subcommand)]
    Sanitize(SanitizeCommand),

    /// View or modify exclusion rules
    #[command(subcommand)]
    Rules(RulesCommand),

    /// Manage backups made before cleaning
    #[command(subcommand)]
    Backups(BackupsCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    use crate::rules::Phy;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "wardrive");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["wardrive", "rules", "list", "--json", "-vv", "-c", "/tmp/w.toml"]);
        assert!(cli.json);
        assert_eq!(cli.verbosity(), Verbosity::Trace);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/w.toml")));
    }

    #[test]
    fn test_quiet_wins() {
        let cli = parse(&["wardrive", "-q", "-v", "config", "path"]);
        assert_eq!(cli.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_export_requires_output_or_preview() {
        assert!(Cli::try_parse_from(["wardrive", "export", "a.kismet"]).is_err());
        assert!(Cli::try_parse_from(["wardrive", "export", "a.kismet", "--stats-only"]).is_ok());
        assert!(Cli::try_parse_from(["wardrive", "export", "a.kismet", "--preview", "3"]).is_ok());
    }

    #[test]
    fn test_export_only_and_no_flags_conflict() {
        let args = ["wardrive", "export", "a.kismet", "--stats-only", "--only-wifi", "--no-bt"];
        assert!(Cli::try_parse_from(args).is_err());
        let args = ["wardrive", "export", "a.kismet", "--stats-only", "--only-wifi", "--only-bt"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_export_zones_accept_negative_coordinates() {
        let cli = parse(&[
            "wardrive",
            "export",
            "logs/",
            "-o",
            "out.csv",
            "--exclude-zone",
            "47.60,-122.34,47.61,-122.33",
            "--exclude-zone",
            "-33.9,151.2,-33.8,151.3",
        ]);
        let Command::Export(cmd) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(cmd.zones.len(), 2);
        assert!(cmd.zones[0].contains(47.605, -122.335));
    }

    #[test]
    fn test_export_bad_zone_rejected() {
        let args = ["wardrive", "export", "a.kismet", "--stats-only", "--exclude-zone", "1,2,3"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_sanitize_process() {
        let cli = parse(&["wardrive", "sanitize", "process", "/data/logs", "--yes", "--no-backup"]);
        assert!(matches!(
            cli.command,
            Command::Sanitize(SanitizeCommand::Process {
                yes: true,
                no_backup: true,
                dry_run: false,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_daemon_mode() {
        let cli = parse(&["wardrive", "sanitize", "daemon", "--mode", "notify"]);
        assert!(matches!(
            cli.command,
            Command::Sanitize(SanitizeCommand::Daemon {
                mode: Some(WatchModeArg::Notify),
                ..
            })
        ));
    }

    #[test]
    fn test_parse_add_static_with_addresses() {
        let cli = parse(&[
            "wardrive",
            "rules",
            "add-static",
            "HomeNet",
            "-d",
            "home router",
            "--address",
            "aa:bb:cc:dd:ee:01,aa:bb:cc:dd:ee:02",
        ]);
        let Command::Rules(RulesCommand::AddStatic {
            addresses, phy, match_type, ..
        }) = cli.command
        else {
            panic!("expected add-static");
        };
        assert_eq!(addresses.len(), 2);
        assert_eq!(Phy::from(phy), Phy::Wifi);
        assert_eq!(match_type, MatchTypeArg::Exact);
    }

    #[test]
    fn test_add_dynamic_requires_description() {
        let args = ["wardrive", "rules", "add-dynamic", "iPhone*", "-t", "pattern"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_backups_delete() {
        let cli = parse(&["wardrive", "backups", "delete", "2024-05-01_120000"]);
        assert!(matches!(cli.command, Command::Backups(BackupsCommand::Delete { .. })));
    }
}
