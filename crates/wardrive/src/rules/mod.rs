//! Exclusion and targeting rules.
//!
//! Rules come in two policy classes. Static exclusions describe hardware with
//! stable addresses and may be enforced at capture time by address. Dynamic
//! exclusions describe hardware that rotates its address, so they only ever
//! match by advertised name and never produce an address blocklist entry.
//! Targeting inclusions are OUI prefixes for the inverted "capture only these"
//! mode.

mod matcher;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use matcher::{find_first_match, matches, wildcard_match, PhyMatchers, RuleMatcher};
pub use store::{
    parse_rules, RemoveOutcome, RuleCounts, RuleListing, RuleStore, StaticAddOutcome,
    StaticRuleRequest,
};

/// How a rule's value is compared against an observed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Case-sensitive equality.
    Exact,
    /// Case-insensitive wildcard pattern (`*` and `?`).
    Pattern,
    /// Hardware address literal. Never matches a name.
    Bssid,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Pattern => write!(f, "pattern"),
            Self::Bssid => write!(f, "bssid"),
        }
    }
}

impl FromStr for MatchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "pattern" => Ok(Self::Pattern),
            "bssid" => Ok(Self::Bssid),
            other => Err(Error::invalid_rule(format!(
                "type must be exact, pattern, or bssid (got '{other}')"
            ))),
        }
    }
}

/// Wireless protocol family a rule or device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phy {
    /// IEEE 802.11.
    Wifi,
    /// Bluetooth Low Energy.
    Btle,
    /// Classic Bluetooth.
    Bt,
}

impl Phy {
    /// All families in file order.
    pub const ALL: [Phy; 3] = [Phy::Wifi, Phy::Btle, Phy::Bt];

    /// The capture tool's name for this family, as stored in `devices.phyname`
    /// and in capture-time filter directives.
    #[must_use]
    pub fn kismet_name(self) -> &'static str {
        match self {
            Self::Wifi => "IEEE802.11",
            Self::Btle => "BTLE",
            Self::Bt => "Bluetooth",
        }
    }

    /// Reverse of [`Phy::kismet_name`].
    #[must_use]
    pub fn from_kismet_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phy| phy.kismet_name() == name)
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Wifi => "WiFi",
            Self::Btle => "BTLE",
            Self::Bt => "Bluetooth",
        }
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi => write!(f, "wifi"),
            Self::Btle => write!(f, "btle"),
            Self::Bt => write!(f, "bt"),
        }
    }
}

impl FromStr for Phy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(Self::Wifi),
            "btle" => Ok(Self::Btle),
            "bt" => Ok(Self::Bt),
            other => Err(Error::invalid_rule(format!(
                "PHY must be wifi, btle, or bt (got '{other}')"
            ))),
        }
    }
}

/// Policy class of an exclusion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleClass {
    /// Stable-address hardware, blockable at capture time.
    Static,
    /// Rotating-address hardware, removed by name after capture.
    Dynamic,
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A section of the rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// An exclusion section for one family and class.
    Exclusions(RuleClass, Phy),
    /// `[targeting_inclusions]`.
    Targeting,
}

/// Recognized but ignored header.
pub(crate) const SMART_MODE_HEADER: &str = "[smart_mode_targets]";

impl Section {
    /// Every writable section, in template order.
    pub const ALL: [Section; 7] = [
        Section::Exclusions(RuleClass::Static, Phy::Wifi),
        Section::Exclusions(RuleClass::Dynamic, Phy::Wifi),
        Section::Exclusions(RuleClass::Static, Phy::Btle),
        Section::Exclusions(RuleClass::Dynamic, Phy::Btle),
        Section::Exclusions(RuleClass::Static, Phy::Bt),
        Section::Exclusions(RuleClass::Dynamic, Phy::Bt),
        Section::Targeting,
    ];

    /// The bracketed header line.
    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            Self::Exclusions(RuleClass::Static, Phy::Wifi) => "[static_exclusions]",
            Self::Exclusions(RuleClass::Dynamic, Phy::Wifi) => "[dynamic_exclusions]",
            Self::Exclusions(RuleClass::Static, Phy::Btle) => "[btle_static_exclusions]",
            Self::Exclusions(RuleClass::Dynamic, Phy::Btle) => "[btle_dynamic_exclusions]",
            Self::Exclusions(RuleClass::Static, Phy::Bt) => "[bt_static_exclusions]",
            Self::Exclusions(RuleClass::Dynamic, Phy::Bt) => "[bt_dynamic_exclusions]",
            Self::Targeting => "[targeting_inclusions]",
        }
    }

    /// Look up a section by its header line.
    #[must_use]
    pub fn from_header(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.header() == line)
    }

    /// Name used in user-facing messages, e.g. "WiFi static exclusions".
    #[must_use]
    pub fn display_name(self) -> String {
        match self {
            Self::Exclusions(class, phy) => format!("{} {class} exclusions", phy.label()),
            Self::Targeting => "targeting inclusions".to_string(),
        }
    }
}

/// A single exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Name, wildcard pattern, or address literal.
    pub value: String,
    /// How `value` is compared.
    pub match_type: MatchType,
    /// Free-form note.
    pub description: String,
    /// Family the rule applies to.
    pub phy: Phy,
}

impl FilterRule {
    /// Create a rule.
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        match_type: MatchType,
        description: impl Into<String>,
        phy: Phy,
    ) -> Self {
        Self {
            value: value.into(),
            match_type,
            description: description.into(),
            phy,
        }
    }

    /// Render as a rule-file data line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{}|{}|{}", self.value, self.match_type, self.description)
    }
}

/// An OUI allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Address prefix, optionally with wildcards (`00:AA:BB:*`).
    pub oui_prefix: String,
    /// Targeting mode the prefix is added to.
    pub mode: String,
    /// Free-form note.
    pub description: String,
}

impl TargetingRule {
    /// Render as a rule-file data line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{}|{}|{}", self.oui_prefix, self.mode, self.description)
    }

    /// Whether `address` falls under this prefix.
    ///
    /// A prefix with wildcards is matched as a whole-address pattern; a bare
    /// prefix matches any address that starts with it.
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        if self.oui_prefix.contains(['*', '?']) {
            wildcard_match(address, &self.oui_prefix)
        } else {
            address
                .to_ascii_uppercase()
                .starts_with(&self.oui_prefix.to_ascii_uppercase())
        }
    }
}

/// Rules of one class, split by family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyRules {
    /// WiFi rules.
    pub wifi: Vec<FilterRule>,
    /// BLE rules.
    pub btle: Vec<FilterRule>,
    /// Classic Bluetooth rules.
    pub bt: Vec<FilterRule>,
}

impl PhyRules {
    /// Rules for one family, in file order.
    #[must_use]
    pub fn get(&self, phy: Phy) -> &[FilterRule] {
        match phy {
            Phy::Wifi => &self.wifi,
            Phy::Btle => &self.btle,
            Phy::Bt => &self.bt,
        }
    }

    /// Mutable access to one family's rules.
    pub fn get_mut(&mut self, phy: Phy) -> &mut Vec<FilterRule> {
        match phy {
            Phy::Wifi => &mut self.wifi,
            Phy::Btle => &mut self.btle,
            Phy::Bt => &mut self.bt,
        }
    }

    /// Total number of rules across families.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wifi.len() + self.btle.len() + self.bt.len()
    }

    /// Whether no family has any rule.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The parsed rule file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Static exclusions, including addresses harvested from capture-tool configs.
    pub static_exclusions: PhyRules,
    /// Dynamic exclusions.
    pub dynamic_exclusions: PhyRules,
    /// Targeting inclusions.
    pub targeting: Vec<TargetingRule>,
}

impl RuleSet {
    /// Rules for one class and family.
    #[must_use]
    pub fn rules(&self, class: RuleClass, phy: Phy) -> &[FilterRule] {
        match class {
            RuleClass::Static => self.static_exclusions.get(phy),
            RuleClass::Dynamic => self.dynamic_exclusions.get(phy),
        }
    }

    /// Mutable access to the rules of one class and family.
    pub fn rules_mut(&mut self, class: RuleClass, phy: Phy) -> &mut Vec<FilterRule> {
        match class {
            RuleClass::Static => self.static_exclusions.get_mut(phy),
            RuleClass::Dynamic => self.dynamic_exclusions.get_mut(phy),
        }
    }
}
