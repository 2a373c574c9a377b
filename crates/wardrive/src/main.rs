//! `wardrive` - CLI for cleaning and exporting wardriving captures
//!
//! Every command calls into the `wardrive` library and renders the result
//! either as text or, with `--json`, as a single JSON document on stdout.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;

use wardrive::backup::BackupManager;
use wardrive::cli::{BackupsCommand, Cli, Command, ConfigCommand, ExportCommand, RulesCommand, SanitizeCommand};
use wardrive::export::{self, ExportReport};
use wardrive::rules::{PhyMatchers, PhyRules, RuleListing, RuleStore, StaticRuleRequest};
use wardrive::sanitize::{self, InteractiveOutcome, Prompt, StdioPrompt};
use wardrive::watch::{self, Daemon, WatchHandle};
use wardrive::{init_logging, Config, Error};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let json = cli.json;
    match run(cli) {
        Err(e) if json => {
            let failure = serde_json::json!({ "success": false, "error": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&failure)?);
            std::process::exit(1);
        }
        other => other,
    }
}

fn run(cli: Cli) -> CliResult {
    let config = Config::load_from(cli.config.clone())?;
    let out = Output { json: cli.json };

    match cli.command {
        Command::Export(cmd) => handle_export(&config, &cmd, out),
        Command::Sanitize(cmd) => handle_sanitize(&config, cmd, out),
        Command::Rules(cmd) => handle_rules(&config, cmd, out),
        Command::Backups(cmd) => handle_backups(&config, cmd, out),
        Command::Config(cmd) => handle_config(&config, cmd, out),
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(self, value: &T, human: impl FnOnce()) -> CliResult {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

fn dynamic_matchers(config: &Config) -> Result<PhyMatchers, Error> {
    Ok(PhyMatchers::new(&RuleStore::from_config(config).load_dynamic()?))
}

fn handle_export(config: &Config, cmd: &ExportCommand, out: Output) -> CliResult {
    let options = cmd.options(config);
    let matchers = if options.apply_name_exclusions {
        dynamic_matchers(config)?
    } else {
        PhyMatchers::new(&PhyRules::default())
    };

    let report = match cmd.output.as_deref().filter(|_| !cmd.stats_only) {
        Some(output) => export::export_to_wigle(&options, &matchers, &config.export, output)?,
        None => export::collect(&options, &matchers)?,
    };
    let shown = &report.records[..cmd.preview.unwrap_or(0).min(report.records.len())];

    let doc = serde_json::json!({
        "success": true,
        "stats": report.stats,
        "failures": report.failures,
        "output": report.output,
        "preview": shown,
    });
    out.emit(&doc, || print_export(&report, cmd.preview.map(|_| shown)))
}

fn print_export(report: &ExportReport, preview: Option<&[wardrive::capture::DeviceRecord]>) {
    let s = &report.stats;
    println!("Export statistics");
    println!("-----------------");
    println!("Files processed:     {}", s.files_processed);
    if s.files_failed > 0 {
        println!("Files failed:        {}", s.files_failed);
        for failure in &report.failures {
            println!("  {}: {}", failure.path.display(), failure.error);
        }
    }
    println!("WiFi devices:        {}", s.wifi_count);
    println!("BTLE devices:        {}", s.btle_count);
    println!("Bluetooth devices:   {}", s.bt_count);
    println!("With GPS:            {}", s.total_with_gps);
    println!("Zone filtered:       {}", s.zone_filtered);
    println!("Name filtered:       {}", s.name_filtered);
    println!("Privacy filtered:    {}", s.privacy_filtered);
    println!("Rate limited:        {}", s.rate_limited);
    println!("Exported:            {}", s.final_count);
    if let Some(output) = &report.output {
        println!("Written to:          {}", output.display());
    }

    if let Some(records) = preview {
        println!();
        for r in records {
            println!(
                "{:<17}  {:<32}  {:>4}  {:>10.6} {:>11.6}  {}",
                r.address,
                r.name,
                r.signal,
                r.latitude,
                r.longitude,
                r.family
            );
        }
    }
}

fn capture_root(config: &Config, path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config.logs_dir())
}

fn handle_sanitize(config: &Config, cmd: SanitizeCommand, out: Output) -> CliResult {
    let matchers = dynamic_matchers(config)?;
    let in_use = config.in_use_threshold();

    match cmd {
        SanitizeCommand::Preview { path } => {
            let scan = sanitize::preview(&capture_root(config, path), &matchers, in_use);
            out.emit(&scan, || print!("{}", sanitize::render_preview(&scan)))
        }
        SanitizeCommand::Process {
            path,
            dry_run,
            yes,
            no_backup,
        } => {
            let scan = sanitize::preview(&capture_root(config, path), &matchers, in_use);
            if dry_run || scan.is_clean() {
                return out.emit(&scan, || print!("{}", sanitize::render_preview(&scan)));
            }

            if !yes {
                if out.json {
                    return Err("refusing to modify captures in JSON mode without --yes".into());
                }
                print!("{}", sanitize::render_preview(&scan));
                let question = format!(
                    "Remove {} records from {} files?",
                    scan.total_matches, scan.affected_files
                );
                if !StdioPrompt.confirm(&question, false)? {
                    println!("Cancelled; nothing was changed.");
                    return Ok(());
                }
            }

            let backups = (!no_backup).then(|| BackupManager::from_config(config));
            let report = sanitize::apply(&scan, &matchers, backups.as_ref())?;
            out.emit(&report, || {
                println!(
                    "Removed {} records from {} files ({} failed) in {} ms",
                    report.records_removed,
                    report.files_modified,
                    report.files_failed,
                    report.duration_ms
                );
                if let Some(backup) = &report.backup {
                    println!("Backup: {}", backup.path.display());
                }
            })
        }
        SanitizeCommand::Interactive { path } => {
            if out.json {
                return Err("interactive mode does not support --json".into());
            }
            let backups = BackupManager::from_config(config);
            let outcome = sanitize::run_interactive(
                &mut StdioPrompt,
                &capture_root(config, path),
                &matchers,
                in_use,
                &backups,
            )?;
            if let InteractiveOutcome::Completed { report, .. } = outcome {
                if report.files_failed > 0 {
                    return Err(format!("{} files could not be cleaned", report.files_failed).into());
                }
            }
            Ok(())
        }
        SanitizeCommand::Daemon {
            path,
            mode,
            dry_run,
            no_backup,
        } => {
            let mut config = config.clone();
            if let Some(mode) = mode {
                config.watch.mode = mode.into();
            }
            run_daemon(&config, &capture_root(&config, path), dry_run, no_backup, out)
        }
    }
}

fn run_daemon(config: &Config, root: &Path, dry_run: bool, no_backup: bool, out: Output) -> CliResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let stats = runtime.block_on(async {
        let handle = WatchHandle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted; stopping after the current cycle");
                stopper.stop();
            }
        });

        let backups = (config.watch.backup && !no_backup).then(|| BackupManager::from_config(config));
        let mut daemon = Daemon::new(
            RuleStore::from_config(config),
            backups,
            config.in_use_threshold(),
            handle.clone(),
        )
        .dry_run(dry_run);
        let mut source = watch::source_for(config, root, handle)?;
        daemon.run(source.as_mut()).await
    })?;

    out.emit(&stats, || {
        println!(
            "{} cycles, {} files cleaned, {} records removed, {} failures",
            stats.cycles, stats.files_cleaned, stats.records_removed, stats.failures
        );
    })
}

fn handle_rules(config: &Config, cmd: RulesCommand, out: Output) -> CliResult {
    let store = RuleStore::from_config(config);

    match cmd {
        RulesCommand::List => {
            let listing = store.list()?;
            out.emit(&listing, || print_rules(&store, &listing))
        }
        RulesCommand::AddStatic {
            value,
            match_type,
            description,
            phy,
            addresses,
        } => {
            let outcome = store.add_static(&StaticRuleRequest {
                value,
                match_type: match_type.into(),
                description,
                phy: phy.into(),
                extra_addresses: addresses,
            })?;
            out.emit(&outcome, || {
                println!("Added static exclusion: {}", outcome.rule.to_line());
                for address in &outcome.extra_addresses {
                    println!("  with address {address}");
                }
                for conf in &outcome.configs_updated {
                    println!("  updated {}", conf.display());
                }
            })
        }
        RulesCommand::AddDynamic {
            value,
            match_type,
            description,
            phy,
        } => {
            let rule = store.add_dynamic(&value, match_type.into(), &description, phy.into())?;
            out.emit(&rule, || {
                println!("Added dynamic exclusion: {}", rule.to_line());
                println!("  matched by name after capture; no address is blocked");
            })
        }
        RulesCommand::AddTarget {
            oui,
            mode,
            description,
        } => {
            let rule = store.add_target(&oui, &mode, &description)?;
            out.emit(&rule, || println!("Added targeting inclusion: {}", rule.to_line()))
        }
        RulesCommand::RemoveStatic { value, phy } => {
            report_removal(&value, &store.remove_static(&value, phy.into())?, out)
        }
        RulesCommand::RemoveDynamic { value, phy } => {
            report_removal(&value, &store.remove_dynamic(&value, phy.into())?, out)
        }
        RulesCommand::RemoveTarget { oui } => report_removal(&oui, &store.remove_target(&oui)?, out),
        RulesCommand::Discover { pattern, logs_dir } => {
            let dir = logs_dir.unwrap_or_else(|| config.logs_dir());
            let addresses = sanitize::historical_addresses(&dir, &pattern)?;
            out.emit(&addresses, || {
                if addresses.is_empty() {
                    println!("No addresses seen for '{pattern}' in {}", dir.display());
                }
                for address in &addresses {
                    println!("{address}");
                }
            })
        }
    }
}

fn report_removal(value: &str, outcome: &wardrive::rules::RemoveOutcome, out: Output) -> CliResult {
    let doc = serde_json::json!({
        "success": !outcome.is_empty(),
        "value": value,
        "removed": outcome,
    });
    out.emit(&doc, || {
        if outcome.is_empty() {
            println!("No rule found for '{value}'");
        } else {
            println!(
                "Removed '{value}' ({} rule lines, {} capture config lines)",
                outcome.rule_lines, outcome.config_lines
            );
        }
    })
}

fn print_rules(store: &RuleStore, listing: &RuleListing) {
    use wardrive::rules::{Phy, RuleClass, Section};

    println!("Rule file: {}", store.path().display());
    for class in [RuleClass::Static, RuleClass::Dynamic] {
        for phy in Phy::ALL {
            let rules = listing.rules.rules(class, phy);
            println!();
            println!("{} ({})", Section::Exclusions(class, phy).display_name(), rules.len());
            for rule in rules {
                println!("  {:<32} {:<8} {}", rule.value, rule.match_type.to_string(), rule.description);
            }
        }
    }
    println!();
    println!("{} ({})", Section::Targeting.display_name(), listing.counts.targets);
    for target in &listing.rules.targeting {
        println!("  {:<12} {:<8} {}", target.oui_prefix, target.mode, target.description);
    }
}

fn handle_backups(config: &Config, cmd: BackupsCommand, out: Output) -> CliResult {
    let manager = BackupManager::from_config(config);
    match cmd {
        BackupsCommand::List => {
            let backups = manager.list_backups()?;
            out.emit(&backups, || {
                if backups.is_empty() {
                    println!("No backups in {}", manager.root().display());
                }
                for b in &backups {
                    println!(
                        "{:<24} {:>4} files {:>10}",
                        b.name,
                        b.file_count,
                        sanitize::format_size(b.size_bytes)
                    );
                }
            })
        }
        BackupsCommand::Delete { backup } => {
            manager.delete_backup(&backup)?;
            let doc = serde_json::json!({ "success": true, "deleted": backup });
            out.emit(&doc, || println!("Deleted backup {}", backup.display()))
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand, out: Output) -> CliResult {
    match cmd {
        ConfigCommand::Show => out.emit(config, || {
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Paths]");
            println!("  Rule file:          {}", config.rules_file().display());
            println!("  Logs directory:     {}", config.logs_dir().display());
            println!("  Backup directory:   {}", config.backup_dir().display());
            println!("  Capture configs:    {}", config.paths.kismet_configs.len());
            println!();
            println!("[Export]");
            println!("  Rate limit:         {}", config.export.rate_limit);
            println!("  Device:             {}", config.export.device);
            println!();
            println!("[Sanitize]");
            println!("  In-use threshold:   {}s", config.sanitize.in_use_secs);
            println!();
            println!("[Watch]");
            println!("  Mode:               {:?}", config.watch.mode);
            println!("  Interval:           {}s", config.watch.interval_secs);
            println!("  Settle delay:       {}s", config.watch.settle_secs);
            println!("  Backup:             {}", config.watch.backup);
        }),
        ConfigCommand::Path => {
            let path = Config::default_config_path();
            out.emit(&path, || println!("{}", path.display()))
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            Config::load_from(Some(path.clone()))?;
            let doc = serde_json::json!({ "success": true, "path": path });
            out.emit(&doc, || println!("Configuration is valid: {}", path.display()))
        }
    }
}
