//! `wardrive` - Kismet capture sanitizer and WiGLE CSV exporter
//!
//! This library removes devices matched by exclusion rules from capture
//! databases and exported CSVs, and converts captures into the WiGLE CSV
//! upload format. The `wardrive` binary is a thin CLI over these modules.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod backup;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod fsutil;
pub mod kismetdb;
pub mod logging;
pub mod rules;
pub mod sanitize;
pub mod watch;

#[cfg(test)]
mod testutil;

pub use capture::{DeviceRecord, ProtocolFamily};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use rules::{FilterRule, MatchType, Phy, RuleStore};
