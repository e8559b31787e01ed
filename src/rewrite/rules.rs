// src/rewrite/rules.rs

use crate::error::RewriteError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One literal substring substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
    /// An empty `from` inserts `to` between every character, so it has to be
    /// asked for explicitly.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_empty_match: bool,
}

impl RewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            allow_empty_match: false,
        }
    }

    /// Parse the CLI form `FROM=>TO`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (from, to) = raw
            .split_once("=>")
            .ok_or_else(|| format!("rule `{}` is not of the form FROM=>TO", raw))?;
        Ok(Self::new(from, to))
    }
}

/// A validated, ordered list of rules applied by sequential composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
}

/// A rule whose output can be matched again on a later pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hazard {
    pub rule: usize,
    pub reintroduces: usize,
}

impl RuleSet {
    pub fn new(rules: Vec<RewriteRule>) -> Result<Self, RewriteError> {
        if rules.is_empty() {
            return Err(RewriteError::InvalidRule {
                index: 0,
                reason: "at least one rule is required".into(),
            });
        }
        for (index, rule) in rules.iter().enumerate() {
            if rule.from.is_empty() && !rule.allow_empty_match {
                return Err(RewriteError::InvalidRule {
                    index,
                    reason: "empty match string (set allow_empty_match to permit it)".into(),
                });
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Apply every rule in order. Returns `Cow::Borrowed` when nothing matched,
    /// so callers can tell an untouched value apart without comparing bytes.
    pub fn apply<'a>(&self, value: &'a str) -> Cow<'a, str> {
        let mut current = Cow::Borrowed(value);
        for rule in &self.rules {
            // `str::contains("")` is always true, which is what an allowed
            // empty match wants.
            if current.contains(rule.from.as_str()) {
                current = Cow::Owned(current.replace(rule.from.as_str(), &rule.to));
            }
        }
        match current {
            Cow::Owned(s) if s == value => Cow::Borrowed(value),
            other => other,
        }
    }

    /// Rules whose replacement contains the match of itself or an earlier
    /// rule. A second pass over their output would rewrite it again.
    /// An identity rule (`from == to`) never changes a value and is not
    /// a hazard to itself.
    pub fn idempotence_hazards(&self) -> Vec<Hazard> {
        let mut hazards = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            for (j, earlier) in self.rules[..=i].iter().enumerate() {
                if i == j && rule.from == rule.to {
                    continue;
                }
                if earlier.from.is_empty() || rule.to.contains(earlier.from.as_str()) {
                    hazards.push(Hazard {
                        rule: i,
                        reintroduces: j,
                    });
                }
            }
        }
        hazards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(rules: &[(&str, &str)]) -> RuleSet {
        RuleSet::new(rules.iter().map(|(f, t)| RewriteRule::new(*f, *t)).collect()).unwrap()
    }

    #[test]
    fn replaces_hostname() {
        let rules = set(&[("cdn.cogitize.tech", "media.example.com")]);
        let out = rules.apply("https://cdn.cogitize.tech/img/1.png");
        assert_eq!(out, "https://media.example.com/img/1.png");

        let again = rules.apply(&out);
        assert!(matches!(again, Cow::Borrowed(_)));
        assert_eq!(again, out);
    }

    #[test]
    fn rules_compose_in_order() {
        let rules = set(&[("old-a.com", "old-b.com"), ("old-b.com", "new.com")]);
        assert_eq!(rules.apply("http://old-a.com/x"), "http://new.com/x");

        // reversed order leaves the intermediate host behind
        let reversed = set(&[("old-b.com", "new.com"), ("old-a.com", "old-b.com")]);
        assert_eq!(reversed.apply("http://old-a.com/x"), "http://old-b.com/x");
    }

    #[test]
    fn replaces_every_occurrence() {
        let rules = set(&[("a.com", "b.org")]);
        let json = r#"{"src":"https://a.com/1","alt":["https://a.com/2","a.com"]}"#;
        assert_eq!(
            rules.apply(json),
            r#"{"src":"https://b.org/1","alt":["https://b.org/2","b.org"]}"#
        );
    }

    #[test]
    fn no_match_is_borrowed() {
        let rules = set(&[("cdn.cogitize.tech", "media.example.com")]);
        assert!(matches!(rules.apply("plain text"), Cow::Borrowed(_)));
        assert!(matches!(rules.apply(""), Cow::Borrowed(_)));
    }

    #[test]
    fn self_cancelling_chain_counts_as_unchanged() {
        let rules = set(&[("x.com", "y.com"), ("y.com", "x.com")]);
        assert!(matches!(rules.apply("http://x.com"), Cow::Borrowed(_)));
    }

    #[test]
    fn matches_are_literal_not_regex() {
        let rules = set(&[("a.b", "c")]);
        assert_eq!(rules.apply("axb a.b"), "axb c");
    }

    #[test]
    fn rejects_empty_rule_list() {
        assert!(matches!(
            RuleSet::new(vec![]),
            Err(RewriteError::InvalidRule { index: 0, .. })
        ));
    }

    #[test]
    fn empty_match_requires_opt_in() {
        let err = RuleSet::new(vec![RewriteRule::new("a", "b"), RewriteRule::new("", "x")]);
        assert!(matches!(err, Err(RewriteError::InvalidRule { index: 1, .. })));

        let mut rule = RewriteRule::new("", "-");
        rule.allow_empty_match = true;
        let rules = RuleSet::new(vec![rule]).unwrap();
        assert_eq!(rules.apply("ab"), "-a-b-");
    }

    #[test]
    fn parse_cli_rule() {
        let rule = RewriteRule::parse("cdn.cogitize.tech=>s3.example.com/bucket?a=b").unwrap();
        assert_eq!(rule.from, "cdn.cogitize.tech");
        assert_eq!(rule.to, "s3.example.com/bucket?a=b");
        assert!(RewriteRule::parse("no-separator").is_err());
    }

    #[test]
    fn detects_hazards() {
        let chain = set(&[("old-a.com", "old-b.com"), ("old-b.com", "new.com")]);
        assert!(chain.idempotence_hazards().is_empty());

        let growing = set(&[("cdn.x.com", "cdn.x.com.backup")]);
        assert_eq!(
            growing.idempotence_hazards(),
            vec![Hazard {
                rule: 0,
                reintroduces: 0
            }]
        );

        let back = set(&[("a.com", "b.com"), ("b.com", "a.com.new")]);
        assert_eq!(
            back.idempotence_hazards(),
            vec![Hazard {
                rule: 1,
                reintroduces: 0
            }]
        );
    }

    #[test]
    fn identity_rule_is_not_a_hazard() {
        let identity = set(&[("a.com", "a.com")]);
        assert!(identity.idempotence_hazards().is_empty());

        // a later rule can still put an earlier match back
        let mixed = set(&[("a.com", "a.com"), ("b.com", "a.com")]);
        assert_eq!(
            mixed.idempotence_hazards(),
            vec![Hazard {
                rule: 1,
                reintroduces: 0
            }]
        );
    }
}
