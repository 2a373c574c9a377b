//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::{Config, WatchMode};
use crate::export::{ExclusionZone, ExportOptions};
use crate::rules::{MatchType, Phy};

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Capture databases, directories, or glob patterns
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Output CSV path
    #[arg(short, long, value_name = "FILE", required_unless_present_any = ["preview", "stats_only"])]
    pub output: Option<PathBuf>,

    /// Show the first N records instead of (or as well as) writing a file
    #[arg(long, value_name = "N")]
    pub preview: Option<usize>,

    /// Only print statistics
    #[arg(long, conflicts_with = "output")]
    pub stats_only: bool,

    /// Export only WiFi devices
    #[arg(long, group = "only", conflicts_with_all = ["no_wifi", "no_btle", "no_bt"])]
    pub only_wifi: bool,

    /// Export only Bluetooth Low Energy devices
    #[arg(long, group = "only", conflicts_with_all = ["no_wifi", "no_btle", "no_bt"])]
    pub only_btle: bool,

    /// Export only classic Bluetooth devices
    #[arg(long, group = "only", conflicts_with_all = ["no_wifi", "no_btle", "no_bt"])]
    pub only_bt: bool,

    /// Leave out WiFi devices
    #[arg(long)]
    pub no_wifi: bool,

    /// Leave out Bluetooth Low Energy devices
    #[arg(long)]
    pub no_btle: bool,

    /// Leave out classic Bluetooth devices
    #[arg(long)]
    pub no_bt: bool,

    /// Drop devices inside a box given as LAT1,LON1,LAT2,LON2 (repeatable)
    #[arg(long = "exclude-zone", value_name = "ZONE", value_parser = parse_zone, allow_hyphen_values = true)]
    pub zones: Vec<ExclusionZone>,

    /// Drop devices whose name matches a dynamic exclusion
    #[arg(long)]
    pub apply_exclusions: bool,

    /// Keep every observation instead of one per device per second
    #[arg(long)]
    pub no_rate_limit: bool,
}

impl ExportCommand {
    /// Selected protocol families. `--only-*` wins over `--no-*`.
    #[must_use]
    pub fn families(&self) -> Vec<Phy> {
        let only: Vec<Phy> = [
            (self.only_wifi, Phy::Wifi),
            (self.only_btle, Phy::Btle),
            (self.only_bt, Phy::Bt),
        ]
        .into_iter()
        .filter_map(|(set, phy)| set.then_some(phy))
        .collect();
        if !only.is_empty() {
            return only;
        }

        Phy::ALL
            .into_iter()
            .filter(|phy| match phy {
                Phy::Wifi => !self.no_wifi,
                Phy::Btle => !self.no_btle,
                Phy::Bt => !self.no_bt,
            })
            .collect()
    }

    /// Export options, with the configured rate-limit default.
    #[must_use]
    pub fn options(&self, config: &Config) -> ExportOptions {
        ExportOptions {
            inputs: self.inputs.clone(),
            families: self.families(),
            zones: self.zones.clone(),
            apply_name_exclusions: self.apply_exclusions,
            rate_limit: config.export.rate_limit && !self.no_rate_limit,
        }
    }
}

fn parse_zone(s: &str) -> Result<ExclusionZone, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

/// Post-capture cleanup commands.
#[derive(Debug, Subcommand)]
pub enum SanitizeCommand {
    /// Show what dynamic exclusions would remove
    Preview {
        /// Capture file or directory (defaults to the configured logs directory)
        path: Option<PathBuf>,
    },

    /// Remove matching records
    Process {
        /// Capture file or directory (defaults to the configured logs directory)
        path: Option<PathBuf>,

        /// Report matches without modifying anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Skip the backup
        #[arg(long)]
        no_backup: bool,
    },

    /// Guided cleanup before uploading
    Interactive {
        /// Capture directory (defaults to the configured logs directory)
        path: Option<PathBuf>,
    },

    /// Keep cleaning new captures until interrupted
    Daemon {
        /// Capture directory (defaults to the configured logs directory)
        path: Option<PathBuf>,

        /// How to discover changed files (defaults to the configured mode)
        #[arg(short, long, value_enum)]
        mode: Option<WatchModeArg>,

        /// Report matches without modifying anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Skip backups
        #[arg(long)]
        no_backup: bool,
    },
}

/// Rule file commands.
#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Show every rule
    List,

    /// Add a static exclusion (blockable by address at capture time)
    AddStatic {
        /// Name, pattern, or address
        value: String,

        /// How the value is matched
        #[arg(short = 't', long = "type", value_enum, default_value = "exact")]
        match_type: MatchTypeArg,

        /// Why the device is excluded
        #[arg(short, long)]
        description: String,

        /// Protocol family
        #[arg(short, long, value_enum, default_value = "wifi")]
        phy: PhyArg,

        /// Additional addresses for the same device
        #[arg(short, long = "address", value_name = "ADDR", value_delimiter = ',')]
        addresses: Vec<String>,
    },

    /// Add a dynamic exclusion (matched by name after capture)
    AddDynamic {
        /// Name or pattern
        value: String,

        /// How the value is matched
        #[arg(short = 't', long = "type", value_enum, default_value = "exact")]
        match_type: MatchTypeArg,

        /// Why the device is excluded
        #[arg(short, long)]
        description: String,

        /// Protocol family
        #[arg(short, long, value_enum, default_value = "wifi")]
        phy: PhyArg,
    },

    /// Add an OUI prefix to the targeting inclusions
    AddTarget {
        /// OUI prefix, e.g. 00:11:22 or 00:11:*
        oui: String,

        /// Targeting mode the prefix belongs to
        #[arg(short, long, default_value = "target")]
        mode: String,

        /// What the prefix identifies
        #[arg(short, long)]
        description: String,
    },

    /// Remove a static exclusion and its capture-time directives
    RemoveStatic {
        /// Value as written in the rule file
        value: String,

        /// Protocol family
        #[arg(short, long, value_enum, default_value = "wifi")]
        phy: PhyArg,
    },

    /// Remove a dynamic exclusion
    RemoveDynamic {
        /// Value as written in the rule file
        value: String,

        /// Protocol family
        #[arg(short, long, value_enum, default_value = "wifi")]
        phy: PhyArg,
    },

    /// Remove a targeting inclusion
    RemoveTarget {
        /// OUI prefix
        oui: String,
    },

    /// Find addresses seen with a matching name in exported CSVs
    Discover {
        /// Name or wildcard pattern
        pattern: String,

        /// Directory to search (defaults to the configured logs directory)
        #[arg(short, long, value_name = "DIR")]
        logs_dir: Option<PathBuf>,
    },
}

/// Backup commands.
#[derive(Debug, Subcommand)]
pub enum BackupsCommand {
    /// List backups, newest first
    List,

    /// Delete a backup
    Delete {
        /// Backup name or path inside the backup directory
        backup: PathBuf,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Protocol family argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhyArg {
    /// IEEE 802.11
    Wifi,
    /// Bluetooth Low Energy
    Btle,
    /// Classic Bluetooth
    Bt,
}

impl From<PhyArg> for Phy {
    fn from(arg: PhyArg) -> Self {
        match arg {
            PhyArg::Wifi => Self::Wifi,
            PhyArg::Btle => Self::Btle,
            PhyArg::Bt => Self::Bt,
        }
    }
}

/// Match type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatchTypeArg {
    /// Case-sensitive equality
    Exact,
    /// Case-insensitive wildcard (* and ?)
    Pattern,
    /// Hardware address
    Bssid,
}

impl From<MatchTypeArg> for MatchType {
    fn from(arg: MatchTypeArg) -> Self {
        match arg {
            MatchTypeArg::Exact => Self::Exact,
            MatchTypeArg::Pattern => Self::Pattern,
            MatchTypeArg::Bssid => Self::Bssid,
        }
    }
}

/// Watch mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchModeArg {
    /// Rescan on an interval
    Poll,
    /// Filesystem change events
    Notify,
}

impl From<WatchModeArg> for WatchMode {
    fn from(arg: WatchModeArg) -> Self {
        match arg {
            WatchModeArg::Poll => Self::Poll,
            WatchModeArg::Notify => Self::Notify,
        }
    }
}
