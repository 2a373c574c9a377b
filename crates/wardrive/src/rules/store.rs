//! The on-disk rule file and the capture-time directives mirrored into the
//! capture tool's own configuration files.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{FilterRule, MatchType, Phy, RuleClass, RuleSet, Section, TargetingRule};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsutil::write_atomic;

/// Prefix of the marker comments written next to capture-time directives.
const MARKER_PREFIX: &str = "# WARDRIVE_FILTER";

/// Key of a capture-time device filter directive.
const DIRECTIVE_KEY: &str = "kis_log_device_filter=";

/// Written when a mutation finds no rule file.
const RULES_TEMPLATE: &str = "\
# wardrive filter rules
#
# STATIC exclusions block hardware with stable addresses at capture time.
# DYNAMIC exclusions remove rotating-address hardware by name after capture;
# their addresses are never written to a blocklist.
# TARGETING inclusions list OUI prefixes for the \"capture only these\" modes.
#
# Line format:  value|type|description
# Types:        exact, pattern (* and ? wildcards, case-insensitive), bssid

[static_exclusions]
# HOME-5G|exact|Home 5GHz network
# 74:83:C2:8A:23:4C|bssid|Home router

[dynamic_exclusions]
# iPhone*|pattern|iOS hotspots

[btle_static_exclusions]
# AA:BB:CC:DD:EE:FF|bssid|Fitness tracker

[btle_dynamic_exclusions]
# Fitbit*|pattern|Any Fitbit

[bt_static_exclusions]
# AA:BB:CC:DD:EE:FF|bssid|Car head unit

[bt_dynamic_exclusions]
# CarPlay*|pattern|Any CarPlay device

[smart_mode_targets]
# reserved

[targeting_inclusions]
# Format: oui_prefix|mode|description
# 00:AA:BB:*|target|New variant
";

/// Parse rule-file text.
///
/// Lines outside a known section, comments, blank lines, lines with fewer
/// than two `|`-separated fields, and lines with an unknown match type are
/// skipped.
#[must_use]
pub fn parse_rules(content: &str) -> RuleSet {
    let mut set = RuleSet::default();
    let mut current: Option<Section> = None;

    for raw in content.lines() {
        let line = raw.trim();

        if line.starts_with('[') && line.ends_with(']') {
            current = Section::from_header(line);
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(section) = current else {
            continue;
        };

        let parts: Vec<&str> = line.splitn(3, '|').collect();
        if parts.len() < 2 {
            debug!(line = %line, "Skipping malformed rule line");
            continue;
        }
        let description = parts.get(2).copied().unwrap_or_default().to_string();

        match section {
            Section::Exclusions(class, phy) => match parts[1].parse::<MatchType>() {
                Ok(match_type) => set.rules_mut(class, phy).push(FilterRule::new(
                    parts[0],
                    match_type,
                    description,
                    phy,
                )),
                Err(_) => debug!(line = %line, "Skipping rule with unknown type"),
            },
            Section::Targeting => set.targeting.push(TargetingRule {
                oui_prefix: parts[0].to_string(),
                mode: parts[1].to_string(),
                description,
            }),
        }
    }

    set
}

/// A parsed `kis_log_device_filter=PHY,ADDR[/MASK],ACTION` line.
#[derive(Debug, PartialEq, Eq)]
struct Directive<'a> {
    phy_name: &'a str,
    address: &'a str,
    action: &'a str,
}

impl<'a> Directive<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let body = line.trim().strip_prefix(DIRECTIVE_KEY)?;
        let mut fields = body.split(',');
        let phy_name = fields.next()?.trim();
        let target = fields.next()?.trim();
        let action = fields.next()?.trim();
        let address = target.split('/').next().unwrap_or(target);
        Some(Self {
            phy_name,
            address,
            action,
        })
    }
}

fn directive_line(phy: Phy, address: &str) -> String {
    format!("{DIRECTIVE_KEY}{},{},block", phy.kismet_name(), address.to_ascii_uppercase())
}

fn marker_line(phy: Phy, value: &str) -> String {
    format!("{MARKER_PREFIX} ({}): {value}", phy.label())
}

/// Context carried by a marker comment, in either the bare or the
/// per-family form.
fn marker_context(line: &str) -> Option<String> {
    let rest = line.strip_prefix(MARKER_PREFIX)?;
    let rest = rest.trim_start();
    let rest = if rest.starts_with('(') {
        let close = rest.find(')')?;
        &rest[close + 1..]
    } else {
        rest
    };
    let context = rest.strip_prefix(':')?.trim();
    Some(context.to_string())
}

fn legacy_description(phy: Phy) -> &'static str {
    match phy {
        Phy::Wifi => "Legacy Kismet filter",
        Phy::Btle => "Legacy Kismet BTLE filter",
        Phy::Bt => "Legacy Kismet BT filter",
    }
}

/// Fold block directives from one capture-tool config into the static rules.
fn merge_directives(set: &mut RuleSet, content: &str) {
    let mut seen: Vec<HashSet<String>> = Phy::ALL
        .iter()
        .map(|&phy| {
            set.static_exclusions
                .get(phy)
                .iter()
                .filter(|r| r.match_type == MatchType::Bssid)
                .map(|r| r.value.to_ascii_uppercase())
                .collect()
        })
        .collect();

    let mut context = String::new();
    for raw in content.lines() {
        let line = raw.trim();

        if let Some(found) = marker_context(line) {
            context = found;
            continue;
        }
        if line.contains("Home network exclusion") || line.contains("Home WiFi") {
            context = "Home Network".to_string();
            continue;
        }

        let Some(directive) = Directive::parse(line) else {
            continue;
        };
        if directive.action != "block" {
            continue;
        }
        let Some(phy) = Phy::from_kismet_name(directive.phy_name) else {
            continue;
        };
        let index = Phy::ALL.iter().position(|p| *p == phy).unwrap_or_default();
        let address = directive.address.to_ascii_uppercase();
        if seen[index].insert(address.clone()) {
            let description = if context.is_empty() {
                legacy_description(phy).to_string()
            } else {
                context.clone()
            };
            set.static_exclusions.get_mut(phy).push(FilterRule::new(
                address,
                MatchType::Bssid,
                description,
                phy,
            ));
        }
        context.clear();
    }
}

/// Validate a hardware address in colon-separated hex form.
fn validate_address(address: &str) -> Result<String> {
    let octets: Vec<&str> = address.split(':').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if well_formed {
        Ok(address.to_ascii_uppercase())
    } else {
        Err(Error::invalid_rule(format!(
            "'{address}' is not a hardware address (expected AA:BB:CC:DD:EE:FF)"
        )))
    }
}

/// Whether a `value|type|description` rule line holds `value`.
/// Addresses compare case-insensitively.
fn line_holds(line: &str, value: &str) -> bool {
    let mut fields = line.split('|');
    match (fields.next(), fields.next()) {
        (Some(held), Some(kind)) => {
            held == value || (kind.trim() == "bssid" && held.eq_ignore_ascii_case(value))
        }
        _ => false,
    }
}

fn validate_value(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::invalid_rule(format!("{what} required")));
    }
    if value.contains('|') || value.contains('\n') {
        return Err(Error::invalid_rule(format!(
            "{what} must not contain '|' or line breaks"
        )));
    }
    Ok(value.to_string())
}

fn validate_description(description: &str) -> Result<String> {
    if description.contains('\n') {
        return Err(Error::invalid_rule("description must be a single line"));
    }
    Ok(description.trim().to_string())
}

fn normalize_oui(oui: &str) -> Result<String> {
    let oui = oui.trim().to_ascii_uppercase();
    if oui.is_empty() {
        return Err(Error::invalid_rule("OUI prefix required"));
    }
    if !oui
        .chars()
        .all(|c| c.is_ascii_hexdigit() || matches!(c, ':' | '*' | '?'))
    {
        return Err(Error::invalid_rule(format!(
            "OUI prefix '{oui}' may only contain hex digits, ':', '*' and '?'"
        )));
    }
    Ok(oui)
}

/// A static exclusion to add.
#[derive(Debug, Clone)]
pub struct StaticRuleRequest {
    /// Name, pattern, or address.
    pub value: String,
    /// How `value` is matched.
    pub match_type: MatchType,
    /// Free-form note.
    pub description: String,
    /// Target family.
    pub phy: Phy,
    /// Further addresses to block alongside the rule.
    pub extra_addresses: Vec<String>,
}

/// What a static add wrote.
#[derive(Debug, Clone, Serialize)]
pub struct StaticAddOutcome {
    /// The primary rule.
    pub rule: FilterRule,
    /// Extra addresses that were new and got stored.
    pub extra_addresses: Vec<String>,
    /// Capture-tool config files that received directives.
    pub configs_updated: Vec<PathBuf>,
}

/// What a removal deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    /// Lines removed from the rule file.
    pub rule_lines: usize,
    /// Marker and directive lines removed from capture-tool configs.
    pub config_lines: usize,
}

impl RemoveOutcome {
    /// Whether anything was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_lines == 0 && self.config_lines == 0
    }
}

/// Per-section rule counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleCounts {
    /// `[static_exclusions]` plus harvested WiFi directives.
    pub wifi_static: usize,
    /// `[dynamic_exclusions]`.
    pub wifi_dynamic: usize,
    /// `[btle_static_exclusions]` plus harvested BLE directives.
    pub btle_static: usize,
    /// `[btle_dynamic_exclusions]`.
    pub btle_dynamic: usize,
    /// `[bt_static_exclusions]` plus harvested Bluetooth directives.
    pub bt_static: usize,
    /// `[bt_dynamic_exclusions]`.
    pub bt_dynamic: usize,
    /// `[targeting_inclusions]`.
    pub targets: usize,
}

/// Every rule with section counts.
#[derive(Debug, Clone, Serialize)]
pub struct RuleListing {
    /// The rules.
    pub rules: RuleSet,
    /// Counts per section.
    pub counts: RuleCounts,
}

impl From<RuleSet> for RuleListing {
    fn from(rules: RuleSet) -> Self {
        let counts = RuleCounts {
            wifi_static: rules.static_exclusions.wifi.len(),
            wifi_dynamic: rules.dynamic_exclusions.wifi.len(),
            btle_static: rules.static_exclusions.btle.len(),
            btle_dynamic: rules.dynamic_exclusions.btle.len(),
            bt_static: rules.static_exclusions.bt.len(),
            bt_dynamic: rules.dynamic_exclusions.bt.len(),
            targets: rules.targeting.len(),
        };
        Self { rules, counts }
    }
}

/// Owner of the rule file.
///
/// All writes go through here: additions insert one line under a section
/// header and removals rewrite the file, both by atomic replacement so a
/// concurrent reader sees either the old or the new file.
#[derive(Debug, Clone)]
pub struct RuleStore {
    rules_path: PathBuf,
    kismet_configs: Vec<PathBuf>,
}

impl RuleStore {
    /// Create a store over a rule file and the capture-tool configs that
    /// carry block directives.
    #[must_use]
    pub fn new(rules_path: impl Into<PathBuf>, kismet_configs: Vec<PathBuf>) -> Self {
        Self {
            rules_path: rules_path.into(),
            kismet_configs,
        }
    }

    /// Create a store from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.rules_file(), config.paths.kismet_configs.clone())
    }

    /// Path of the rule file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.rules_path
    }

    /// Load every rule, merged with block directives found in the
    /// capture-tool configs.
    ///
    /// A missing rule file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file exists but cannot be read.
    pub fn load(&self) -> Result<RuleSet> {
        let mut set = match fs::read_to_string(&self.rules_path) {
            Ok(content) => parse_rules(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Rule file not found: {}", self.rules_path.display());
                RuleSet::default()
            }
            Err(e) => return Err(e.into()),
        };

        for conf in &self.kismet_configs {
            match fs::read_to_string(conf) {
                Ok(content) => merge_directives(&mut set, &content),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %conf.display(), error = %e, "Cannot read capture config"),
            }
        }

        debug!(
            static_rules = set.static_exclusions.len(),
            dynamic_rules = set.dynamic_exclusions.len(),
            targets = set.targeting.len(),
            "Loaded rules"
        );
        Ok(set)
    }

    /// Only the dynamic exclusions, for the remover and the watch loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file exists but cannot be read.
    pub fn load_dynamic(&self) -> Result<super::PhyRules> {
        Ok(self.load()?.dynamic_exclusions)
    }

    /// Create the rule file from the template if it does not exist.
    ///
    /// Returns `true` if the file was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn ensure_file(&self) -> Result<bool> {
        if self.rules_path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.rules_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        write_atomic(&self.rules_path, RULES_TEMPLATE.as_bytes())?;
        info!("Created rule file: {}", self.rules_path.display());
        Ok(true)
    }

    /// Insert a rule line directly below a section header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SectionMissing`] if the header is absent, or an I/O
    /// error if the file cannot be read or replaced.
    pub fn add(&self, section: Section, rule: &FilterRule) -> Result<()> {
        self.insert_line(section, &rule.to_line())
    }

    fn insert_line(&self, section: Section, entry: &str) -> Result<()> {
        let content = fs::read_to_string(&self.rules_path)?;
        let header = section.header();

        let mut out = String::with_capacity(content.len() + entry.len() + 1);
        let mut inserted = false;
        for line in content.lines() {
            out.push_str(line);
            out.push('\n');
            if !inserted && line.trim() == header {
                out.push_str(entry);
                out.push('\n');
                inserted = true;
            }
        }
        if !inserted {
            return Err(Error::SectionMissing {
                section: header.to_string(),
                path: self.rules_path.clone(),
            });
        }

        write_atomic(&self.rules_path, out.as_bytes())?;
        debug!(section = header, entry = %entry, "Added rule line");
        Ok(())
    }

    /// Delete every line in `section` whose first field equals `value`.
    ///
    /// For static sections the matching capture-time markers and directives
    /// are retracted as well. Dynamic sections have none to retract.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file cannot be read or replaced.
    pub fn remove(&self, section: Section, value: &str) -> Result<RemoveOutcome> {
        let mut outcome = RemoveOutcome {
            rule_lines: self.remove_lines(section, value)?,
            config_lines: 0,
        };

        if let Section::Exclusions(RuleClass::Static, phy) = section {
            outcome.config_lines = self.retract_directives(phy, value);
        }

        info!(
            section = section.header(),
            value = %value,
            rule_lines = outcome.rule_lines,
            config_lines = outcome.config_lines,
            "Removed rule"
        );
        Ok(outcome)
    }

    fn remove_lines(&self, section: Section, value: &str) -> Result<usize> {
        let content = match fs::read_to_string(&self.rules_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Rule file not found: {}", self.rules_path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let header = section.header();
        let mut in_section = false;
        let mut removed = 0;
        let mut out = String::with_capacity(content.len());
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                in_section = trimmed == header;
            } else if in_section
                && !trimmed.starts_with('#')
                && line_holds(trimmed, value)
            {
                removed += 1;
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }

        if removed > 0 {
            write_atomic(&self.rules_path, out.as_bytes())?;
        }
        Ok(removed)
    }

    /// Remove markers and block directives for `value` from every capture
    /// config. Failures are logged, not returned.
    fn retract_directives(&self, phy: Phy, value: &str) -> usize {
        let bare_marker = format!("{MARKER_PREFIX}: {value}");
        let family_marker = marker_line(phy, value);
        let is_address = validate_address(value).is_ok();
        let is_marker = |line: &str| {
            [&bare_marker, &family_marker].iter().any(|m| {
                let (Some(head), Some(rest)) = (line.get(..m.len()), line.get(m.len()..)) else {
                    return false;
                };
                let same = if is_address {
                    head.eq_ignore_ascii_case(m)
                } else {
                    head == m.as_str()
                };
                same && (rest.is_empty() || rest.starts_with(' '))
            })
        };

        let mut total = 0;
        for conf in &self.kismet_configs {
            let content = match fs::read_to_string(conf) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %conf.display(), error = %e, "Cannot read capture config");
                    continue;
                }
            };

            let mut removed = 0;
            let mut out = String::with_capacity(content.len());
            for line in content.lines() {
                let trimmed = line.trim();
                let is_directive = Directive::parse(trimmed).is_some_and(|d| {
                    d.phy_name == phy.kismet_name() && d.address.eq_ignore_ascii_case(value)
                });
                if is_directive || is_marker(trimmed) {
                    removed += 1;
                    continue;
                }
                out.push_str(line);
                out.push('\n');
            }

            if removed == 0 {
                continue;
            }
            match write_atomic(conf, out.as_bytes()) {
                Ok(()) => total += removed,
                Err(e) => warn!(path = %conf.display(), error = %e, "Cannot update capture config"),
            }
        }
        total
    }

    /// Case-insensitive duplicate check within one class and family.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file exists but cannot be read.
    pub fn exists(&self, value: &str, phy: Phy, class: RuleClass) -> Result<bool> {
        let set = self.load()?;
        Ok(set
            .rules(class, phy)
            .iter()
            .any(|r| r.value.eq_ignore_ascii_case(value)))
    }

    fn reject_duplicate(&self, value: &str, phy: Phy, class: RuleClass) -> Result<()> {
        if self.exists(value, phy, class)? {
            return Err(Error::DuplicateRule {
                value: value.to_string(),
                section: Section::Exclusions(class, phy).display_name(),
            });
        }
        Ok(())
    }

    /// Add a static exclusion, its extra addresses, and the matching
    /// capture-time directives.
    ///
    /// # Errors
    ///
    /// Returns a rule rejection for invalid input or a duplicate, or an I/O
    /// error if the rule file cannot be written.
    pub fn add_static(&self, request: &StaticRuleRequest) -> Result<StaticAddOutcome> {
        let phy = request.phy;
        let mut value = validate_value(&request.value, "name or address")?;
        if request.match_type == MatchType::Bssid {
            value = validate_address(&value)?;
        }
        let description = validate_description(&request.description)?;
        let extras = request
            .extra_addresses
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(validate_address)
            .collect::<Result<Vec<_>>>()?;

        self.reject_duplicate(&value, phy, RuleClass::Static)?;
        self.ensure_file()?;

        let section = Section::Exclusions(RuleClass::Static, phy);
        let rule = FilterRule::new(value, request.match_type, description, phy);
        self.add(section, &rule)?;

        let mut added = Vec::new();
        for address in extras {
            if added.contains(&address) || self.exists(&address, phy, RuleClass::Static)? {
                debug!(address = %address, "Skipping duplicate address");
                continue;
            }
            let extra = FilterRule::new(
                address.clone(),
                MatchType::Bssid,
                format!("{} MAC", rule.description),
                phy,
            );
            self.add(section, &extra)?;
            added.push(address);
        }

        let configs_updated = self.apply_directives(&rule, &added);
        info!(
            value = %rule.value,
            phy = %phy,
            extra = added.len(),
            "Added static exclusion"
        );

        Ok(StaticAddOutcome {
            rule,
            extra_addresses: added,
            configs_updated,
        })
    }

    /// Append markers and directives for a new static rule to every existing
    /// capture config.
    fn apply_directives(&self, rule: &FilterRule, addresses: &[String]) -> Vec<PathBuf> {
        let marker = marker_line(rule.phy, &rule.value);
        let mut block = String::new();
        if rule.match_type == MatchType::Bssid {
            block.push_str(&format!("{marker}\n{}\n", directive_line(rule.phy, &rule.value)));
        } else if !addresses.is_empty() {
            for address in addresses {
                block.push_str(&format!("{marker}\n{}\n", directive_line(rule.phy, address)));
            }
        } else if rule.phy == Phy::Wifi {
            block.push_str(&format!(
                "{marker} (SSID-only, discover BSSIDs with `wardrive rules discover`)\n"
            ));
        } else {
            block.push_str(&format!(
                "{marker} (name-only, a dynamic exclusion is recommended for {})\n",
                rule.phy.label()
            ));
        }

        let mut updated = Vec::new();
        for conf in &self.kismet_configs {
            if !conf.exists() {
                continue;
            }
            match append_block(conf, &block) {
                Ok(()) => updated.push(conf.clone()),
                Err(e) => warn!(path = %conf.display(), error = %e, "Cannot update capture config"),
            }
        }
        updated
    }

    /// Add a dynamic exclusion. Only `exact` and `pattern` are accepted.
    ///
    /// # Errors
    ///
    /// Returns a rule rejection for invalid input or a duplicate, or an I/O
    /// error if the rule file cannot be written.
    pub fn add_dynamic(
        &self,
        value: &str,
        match_type: MatchType,
        description: &str,
        phy: Phy,
    ) -> Result<FilterRule> {
        if match_type == MatchType::Bssid {
            return Err(Error::invalid_rule(
                "dynamic exclusions match by name; type must be exact or pattern",
            ));
        }
        let value = validate_value(value, "name")?;
        let description = validate_description(description)?;
        self.reject_duplicate(&value, phy, RuleClass::Dynamic)?;
        self.ensure_file()?;

        let rule = FilterRule::new(value, match_type, description, phy);
        self.add(Section::Exclusions(RuleClass::Dynamic, phy), &rule)?;
        info!(value = %rule.value, phy = %phy, "Added dynamic exclusion (post-processing only)");
        Ok(rule)
    }

    /// Remove a static exclusion and its capture-time directives.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file cannot be read or replaced.
    pub fn remove_static(&self, value: &str, phy: Phy) -> Result<RemoveOutcome> {
        self.remove(Section::Exclusions(RuleClass::Static, phy), value)
    }

    /// Remove a dynamic exclusion.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file cannot be read or replaced.
    pub fn remove_dynamic(&self, value: &str, phy: Phy) -> Result<RemoveOutcome> {
        self.remove(Section::Exclusions(RuleClass::Dynamic, phy), value)
    }

    /// Add an OUI prefix to the targeting inclusions.
    ///
    /// # Errors
    ///
    /// Returns a rule rejection for an invalid or duplicate prefix, or an I/O
    /// error if the rule file cannot be written.
    pub fn add_target(&self, oui: &str, mode: &str, description: &str) -> Result<TargetingRule> {
        let oui_prefix = normalize_oui(oui)?;
        let mode = validate_value(mode, "targeting mode")?;
        let description = validate_description(description)?;

        let set = self.load()?;
        if set
            .targeting
            .iter()
            .any(|t| t.oui_prefix.eq_ignore_ascii_case(&oui_prefix))
        {
            return Err(Error::DuplicateRule {
                value: oui_prefix,
                section: Section::Targeting.display_name(),
            });
        }

        self.ensure_file()?;
        let rule = TargetingRule {
            oui_prefix,
            mode,
            description,
        };
        self.insert_line(Section::Targeting, &rule.to_line())?;
        info!(oui = %rule.oui_prefix, mode = %rule.mode, "Added targeting inclusion");
        Ok(rule)
    }

    /// Remove an OUI prefix from the targeting inclusions.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file cannot be read or replaced.
    pub fn remove_target(&self, oui: &str) -> Result<RemoveOutcome> {
        let oui_prefix = normalize_oui(oui)?;
        self.remove(Section::Targeting, &oui_prefix)
    }

    /// Every rule with per-section counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file exists but cannot be read.
    pub fn list(&self) -> Result<RuleListing> {
        Ok(self.load()?.into())
    }
}

fn append_block(path: &Path, block: &str) -> std::io::Result<()> {
    let needs_newline = fs::read(path)
        .map(|bytes| bytes.last().is_some_and(|b| *b != b'\n'))
        .unwrap_or(false);
    let mut file = OpenOptions::new().append(true).open(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    file.write_all(block.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: RuleStore,
        kismet_conf: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kismet_conf = dir.path().join("kismet_site.conf");
        fs::write(&kismet_conf, "# site config\nlog_prefix=/home/pi/kismet/logs\n").unwrap();
        let store = RuleStore::new(
            dir.path().join("wardrive/filter_rules.conf"),
            vec![kismet_conf.clone(), dir.path().join("missing.conf")],
        );
        store.ensure_file().unwrap();
        Fixture {
            _dir: dir,
            store,
            kismet_conf,
        }
    }

    #[test]
    fn test_parse_rules_sections() {
        let content = "\
[static_exclusions]
HOME-5G|exact|Home 5GHz
74:83:C2:8A:23:4C|bssid

[dynamic_exclusions]
# comment
iPhone*|pattern|iOS hotspots
malformed line

[btle_dynamic_exclusions]
Fitbit*|pattern|Trackers

[smart_mode_targets]
ignored|target|x

[targeting_inclusions]
00:AA:BB:*|target|New variant
";
        let set = parse_rules(content);
        assert_eq!(set.static_exclusions.wifi.len(), 2);
        assert_eq!(set.static_exclusions.wifi[1].description, "");
        assert_eq!(set.dynamic_exclusions.wifi.len(), 1);
        assert_eq!(set.dynamic_exclusions.wifi[0].match_type, MatchType::Pattern);
        assert_eq!(set.dynamic_exclusions.btle[0].phy, Phy::Btle);
        assert_eq!(set.targeting.len(), 1);
        assert_eq!(set.targeting[0].mode, "target");
    }

    #[test]
    fn test_parse_rules_description_keeps_pipes() {
        let set = parse_rules("[dynamic_exclusions]\nA|exact|one|two\n");
        assert_eq!(set.dynamic_exclusions.wifi[0].description, "one|two");
    }

    #[test]
    fn test_parse_rules_skips_unknown_type_and_orphans() {
        let set = parse_rules("orphan|exact\n[dynamic_exclusions]\nA|regex|x\n");
        assert!(set.dynamic_exclusions.is_empty());
    }

    #[test]
    fn test_marker_context_forms() {
        assert_eq!(
            marker_context("# WARDRIVE_FILTER: Office"),
            Some("Office".to_string())
        );
        assert_eq!(
            marker_context("# WARDRIVE_FILTER (BTLE): Tracker"),
            Some("Tracker".to_string())
        );
        assert_eq!(marker_context("# something else"), None);
    }

    #[test]
    fn test_directive_parse() {
        let d = Directive::parse("kis_log_device_filter=IEEE802.11,aa:bb:cc:dd:ee:ff/FF:FF:FF:00:00:00,block")
            .unwrap();
        assert_eq!(d.phy_name, "IEEE802.11");
        assert_eq!(d.address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(d.action, "block");
        assert!(Directive::parse("kis_log_device_filter=BTLE,AA").is_none());
        assert!(Directive::parse("log_prefix=/tmp").is_none());
    }

    #[test]
    fn test_merge_directives() {
        let mut set = parse_rules("[static_exclusions]\naa:bb:cc:dd:ee:ff|bssid|Router\n");
        merge_directives(
            &mut set,
            "\
# Home network exclusion
kis_log_device_filter=IEEE802.11,AA:BB:CC:DD:EE:FF,block
# WARDRIVE_FILTER: Office AP
kis_log_device_filter=IEEE802.11,11:22:33:44:55:66,block
kis_log_device_filter=BTLE,66:55:44:33:22:11,block
kis_log_device_filter=Bluetooth,01:02:03:04:05:06,pass
",
        );
        let wifi = &set.static_exclusions.wifi;
        assert_eq!(wifi.len(), 2);
        assert_eq!(wifi[1].value, "11:22:33:44:55:66");
        assert_eq!(wifi[1].description, "Office AP");
        assert_eq!(set.static_exclusions.btle[0].description, "Legacy Kismet BTLE filter");
        assert!(set.static_exclusions.bt.is_empty());
    }

    #[test]
    fn test_ensure_file_creates_template_once() {
        let f = fixture();
        assert!(!f.store.ensure_file().unwrap());
        let content = fs::read_to_string(f.store.path()).unwrap();
        for section in Section::ALL {
            assert!(content.contains(section.header()));
        }
        assert!(f.store.load().unwrap().dynamic_exclusions.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("none.conf"), vec![]);
        let set = store.load().unwrap();
        assert!(set.static_exclusions.is_empty());
        assert!(set.targeting.is_empty());
    }

    #[test]
    fn test_add_inserts_below_header() {
        let f = fixture();
        let section = Section::Exclusions(RuleClass::Dynamic, Phy::Wifi);
        f.store
            .add(section, &FilterRule::new("First", MatchType::Exact, "", Phy::Wifi))
            .unwrap();
        f.store
            .add(section, &FilterRule::new("Second", MatchType::Exact, "", Phy::Wifi))
            .unwrap();

        let content = fs::read_to_string(f.store.path()).unwrap();
        let header_at = content.find("[dynamic_exclusions]\nSecond|exact|\nFirst|exact|\n");
        assert!(header_at.is_some(), "{content}");
    }

    #[test]
    fn test_add_missing_section_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.conf");
        fs::write(&path, "[static_exclusions]\n").unwrap();
        let store = RuleStore::new(&path, vec![]);

        let err = store
            .add(
                Section::Exclusions(RuleClass::Dynamic, Phy::Wifi),
                &FilterRule::new("X", MatchType::Exact, "", Phy::Wifi),
            )
            .unwrap_err();
        assert!(matches!(err, Error::SectionMissing { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[static_exclusions]\n");
    }

    #[test]
    fn test_add_dynamic_and_duplicate() {
        let f = fixture();
        f.store
            .add_dynamic("PoppaShell", MatchType::Exact, "Personal hotspot", Phy::Wifi)
            .unwrap();
        assert!(f.store.exists("poppashell", Phy::Wifi, RuleClass::Dynamic).unwrap());
        assert!(!f.store.exists("poppashell", Phy::Btle, RuleClass::Dynamic).unwrap());

        let err = f
            .store
            .add_dynamic("POPPASHELL", MatchType::Exact, "", Phy::Wifi)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'POPPASHELL' already exists in WiFi dynamic exclusions"
        );
    }

    #[test]
    fn test_add_dynamic_rejects_bssid_and_empty() {
        let f = fixture();
        assert!(f
            .store
            .add_dynamic("AA:BB:CC:DD:EE:FF", MatchType::Bssid, "", Phy::Wifi)
            .unwrap_err()
            .is_rule_rejection());
        assert!(f
            .store
            .add_dynamic("  ", MatchType::Exact, "", Phy::Wifi)
            .unwrap_err()
            .is_rule_rejection());
        assert!(f
            .store
            .add_dynamic("a|b", MatchType::Exact, "", Phy::Wifi)
            .unwrap_err()
            .is_rule_rejection());
    }

    #[test]
    fn test_dynamic_add_never_touches_capture_config() {
        let f = fixture();
        let before = fs::read_to_string(&f.kismet_conf).unwrap();
        f.store
            .add_dynamic("PoppaShell", MatchType::Exact, "", Phy::Wifi)
            .unwrap();
        f.store.remove_dynamic("PoppaShell", Phy::Wifi).unwrap();
        assert_eq!(fs::read_to_string(&f.kismet_conf).unwrap(), before);
        assert!(f.store.load().unwrap().static_exclusions.is_empty());
    }

    #[test]
    fn test_add_static_bssid_writes_directive() {
        let f = fixture();
        let outcome = f
            .store
            .add_static(&StaticRuleRequest {
                value: "74:83:c2:8a:23:4c".to_string(),
                match_type: MatchType::Bssid,
                description: "Home router".to_string(),
                phy: Phy::Wifi,
                extra_addresses: vec![],
            })
            .unwrap();
        assert_eq!(outcome.rule.value, "74:83:C2:8A:23:4C");
        assert_eq!(outcome.configs_updated, vec![f.kismet_conf.clone()]);

        let conf = fs::read_to_string(&f.kismet_conf).unwrap();
        assert!(conf.contains("# WARDRIVE_FILTER (WiFi): 74:83:C2:8A:23:4C\n"));
        assert!(conf.contains("kis_log_device_filter=IEEE802.11,74:83:C2:8A:23:4C,block\n"));

        // Directive and rule line describe the same address once.
        let set = f.store.load().unwrap();
        assert_eq!(set.static_exclusions.wifi.len(), 1);
    }

    #[test]
    fn test_add_static_ssid_with_extra_addresses() {
        let f = fixture();
        let outcome = f
            .store
            .add_static(&StaticRuleRequest {
                value: "HOME-5G".to_string(),
                match_type: MatchType::Exact,
                description: "Home".to_string(),
                phy: Phy::Wifi,
                extra_addresses: vec![
                    "aa:bb:cc:dd:ee:01".to_string(),
                    "AA:BB:CC:DD:EE:01".to_string(),
                    " ".to_string(),
                ],
            })
            .unwrap();
        assert_eq!(outcome.extra_addresses, vec!["AA:BB:CC:DD:EE:01".to_string()]);

        let set = f.store.load().unwrap();
        let extra = set
            .static_exclusions
            .wifi
            .iter()
            .find(|r| r.match_type == MatchType::Bssid)
            .unwrap();
        assert_eq!(extra.description, "Home MAC");

        let conf = fs::read_to_string(&f.kismet_conf).unwrap();
        assert!(conf.contains("# WARDRIVE_FILTER (WiFi): HOME-5G\n"));
        assert!(conf.contains("kis_log_device_filter=IEEE802.11,AA:BB:CC:DD:EE:01,block"));
    }

    #[test]
    fn test_add_static_name_only_marker() {
        let f = fixture();
        f.store
            .add_static(&StaticRuleRequest {
                value: "CarAudio".to_string(),
                match_type: MatchType::Exact,
                description: String::new(),
                phy: Phy::Bt,
                extra_addresses: vec![],
            })
            .unwrap();
        let conf = fs::read_to_string(&f.kismet_conf).unwrap();
        assert!(conf.contains("# WARDRIVE_FILTER (Bluetooth): CarAudio (name-only"));
        assert!(!conf.contains("kis_log_device_filter"));
    }

    #[test]
    fn test_add_static_rejects_bad_address() {
        let f = fixture();
        let err = f
            .store
            .add_static(&StaticRuleRequest {
                value: "not-a-mac".to_string(),
                match_type: MatchType::Bssid,
                description: String::new(),
                phy: Phy::Wifi,
                extra_addresses: vec![],
            })
            .unwrap_err();
        assert!(err.is_rule_rejection());
    }

    #[test]
    fn test_remove_static_retracts_directives() {
        let f = fixture();
        f.store
            .add_static(&StaticRuleRequest {
                value: "74:83:C2:8A:23:4C".to_string(),
                match_type: MatchType::Bssid,
                description: "Router".to_string(),
                phy: Phy::Wifi,
                extra_addresses: vec![],
            })
            .unwrap();

        let outcome = f.store.remove_static("74:83:C2:8A:23:4C", Phy::Wifi).unwrap();
        assert_eq!(outcome.rule_lines, 1);
        assert_eq!(outcome.config_lines, 2);

        let conf = fs::read_to_string(&f.kismet_conf).unwrap();
        assert_eq!(conf, "# site config\nlog_prefix=/home/pi/kismet/logs\n");
        assert!(f.store.load().unwrap().static_exclusions.is_empty());
    }

    #[test]
    fn test_remove_static_address_ignores_case() {
        let f = fixture();
        f.store
            .add_static(&StaticRuleRequest {
                value: "74:83:C2:8A:23:4C".to_string(),
                match_type: MatchType::Bssid,
                description: "Router".to_string(),
                phy: Phy::Wifi,
                extra_addresses: vec![],
            })
            .unwrap();

        let outcome = f.store.remove_static("74:83:c2:8a:23:4c", Phy::Wifi).unwrap();
        assert_eq!(outcome.rule_lines, 1);
        assert_eq!(outcome.config_lines, 2);
        assert!(f.store.load().unwrap().static_exclusions.is_empty());

        f.store
            .add_static(&StaticRuleRequest {
                value: "HomeNet".to_string(),
                match_type: MatchType::Exact,
                description: "Home".to_string(),
                phy: Phy::Wifi,
                extra_addresses: vec![],
            })
            .unwrap();
        let outcome = f.store.remove_static("homenet", Phy::Wifi).unwrap();
        assert_eq!(outcome.rule_lines, 0);
    }

    #[test]
    fn test_line_holds() {
        assert!(line_holds("AA:BB:CC:DD:EE:FF|bssid|Router", "aa:bb:cc:dd:ee:ff"));
        assert!(line_holds("HomeNet|exact|Home", "HomeNet"));
        assert!(!line_holds("HomeNet|exact|Home", "homenet"));
        assert!(!line_holds("HomeNet", "HomeNet"));
    }

    #[test]
    fn test_remove_only_within_section() {
        let f = fixture();
        f.store
            .add_dynamic("Shared", MatchType::Exact, "", Phy::Wifi)
            .unwrap();
        f.store
            .add_dynamic("Shared", MatchType::Exact, "", Phy::Btle)
            .unwrap();

        let outcome = f.store.remove_dynamic("Shared", Phy::Btle).unwrap();
        assert_eq!(outcome.rule_lines, 1);

        let set = f.store.load().unwrap();
        assert_eq!(set.dynamic_exclusions.wifi.len(), 1);
        assert!(set.dynamic_exclusions.btle.is_empty());
    }

    #[test]
    fn test_remove_missing_value_is_empty() {
        let f = fixture();
        let outcome = f.store.remove_dynamic("Nothing", Phy::Wifi).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_targets() {
        let f = fixture();
        let rule = f.store.add_target("00:aa:bb:*", "target", "Variant").unwrap();
        assert_eq!(rule.oui_prefix, "00:AA:BB:*");

        assert!(matches!(
            f.store.add_target("00:AA:BB:*", "target", "").unwrap_err(),
            Error::DuplicateRule { .. }
        ));
        assert!(f.store.add_target("zz:11", "target", "").is_err());

        assert_eq!(f.store.list().unwrap().counts.targets, 1);
        assert_eq!(f.store.remove_target("00:aa:bb:*").unwrap().rule_lines, 1);
        assert_eq!(f.store.list().unwrap().counts.targets, 0);
    }

    #[test]
    fn test_list_counts() {
        let f = fixture();
        f.store
            .add_dynamic("iPhone*", MatchType::Pattern, "iOS hotspots", Phy::Wifi)
            .unwrap();
        f.store
            .add_dynamic("Fitbit*", MatchType::Pattern, "", Phy::Btle)
            .unwrap();
        let listing = f.store.list().unwrap();
        assert_eq!(listing.counts.wifi_dynamic, 1);
        assert_eq!(listing.counts.btle_dynamic, 1);
        assert_eq!(listing.counts.wifi_static, 0);

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["counts"]["wifi_dynamic"], 1);
        assert_eq!(
            json["rules"]["dynamic_exclusions"]["wifi"][0]["match_type"],
            "pattern"
        );
    }
}
