//! Name matching against exclusion rules.

use regex::{Regex, RegexBuilder};
use tracing::{trace, warn};

use super::{FilterRule, MatchType, Phy, PhyRules};

/// Translate a `*`/`?` wildcard pattern into an anchored regex source.
///
/// Every other character is literal, including `[` and `.`.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

fn compile_wildcard(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(&glob_to_regex(pattern))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Unusable wildcard pattern");
            None
        }
    }
}

/// Case-insensitive wildcard match of the whole of `text`.
#[must_use]
pub fn wildcard_match(text: &str, pattern: &str) -> bool {
    compile_wildcard(pattern).is_some_and(|re| re.is_match(text))
}

/// Whether `name` matches `rule`.
///
/// Address-literal rules never match a name.
#[must_use]
pub fn matches(name: &str, rule: &FilterRule) -> bool {
    match rule.match_type {
        MatchType::Exact => name == rule.value,
        MatchType::Pattern => wildcard_match(name, &rule.value),
        MatchType::Bssid => false,
    }
}

/// The first rule in file order that matches `name`.
#[must_use]
pub fn find_first_match<'a>(name: &str, rules: &'a [FilterRule]) -> Option<&'a FilterRule> {
    rules.iter().find(|rule| matches(name, rule))
}

#[derive(Debug)]
enum Compiled {
    Exact(String),
    Pattern(Regex),
    Never,
}

/// A rule list with its patterns compiled once.
///
/// Gives the same answers as [`find_first_match`] without recompiling a
/// pattern per name.
#[derive(Debug)]
pub struct RuleMatcher {
    entries: Vec<(FilterRule, Compiled)>,
}

impl RuleMatcher {
    /// Compile `rules`, keeping their order.
    #[must_use]
    pub fn new(rules: &[FilterRule]) -> Self {
        let entries = rules
            .iter()
            .map(|rule| {
                let compiled = match rule.match_type {
                    MatchType::Exact => Compiled::Exact(rule.value.clone()),
                    MatchType::Pattern => {
                        compile_wildcard(&rule.value).map_or(Compiled::Never, Compiled::Pattern)
                    }
                    MatchType::Bssid => Compiled::Never,
                };
                (rule.clone(), compiled)
            })
            .collect();
        Self { entries }
    }

    /// The first rule that matches `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&FilterRule> {
        let hit = self.entries.iter().find_map(|(rule, compiled)| {
            let matched = match compiled {
                Compiled::Exact(value) => name == value,
                Compiled::Pattern(re) => re.is_match(name),
                Compiled::Never => false,
            };
            matched.then_some(rule)
        });
        if let Some(rule) = hit {
            trace!(name = %name, rule = %rule.value, "Name matched rule");
        }
        hit
    }

    /// The first rule matched by any of `names`, with the name that hit.
    ///
    /// Names are tried in order; the first name with a match wins.
    #[must_use]
    pub fn find_any<'a, I>(&self, names: I) -> Option<(&'a str, &FilterRule)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .find_map(|name| self.find(name).map(|rule| (name, rule)))
    }

    /// Whether there are no rules that could match a name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, compiled)| matches!(compiled, Compiled::Never))
    }
}

/// One compiled matcher per family, built from a dynamic rule set.
#[derive(Debug)]
pub struct PhyMatchers {
    wifi: RuleMatcher,
    btle: RuleMatcher,
    bt: RuleMatcher,
}

impl PhyMatchers {
    /// Compile every family's rules.
    #[must_use]
    pub fn new(rules: &PhyRules) -> Self {
        Self {
            wifi: RuleMatcher::new(rules.get(Phy::Wifi)),
            btle: RuleMatcher::new(rules.get(Phy::Btle)),
            bt: RuleMatcher::new(rules.get(Phy::Bt)),
        }
    }

    /// The matcher for `phy`.
    #[must_use]
    pub fn get(&self, phy: Phy) -> &RuleMatcher {
        match phy {
            Phy::Wifi => &self.wifi,
            Phy::Btle => &self.btle,
            Phy::Bt => &self.bt,
        }
    }

    /// Whether no family has a rule that could match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Phy::ALL.iter().all(|&phy| self.get(phy).is_empty())
    }
}
