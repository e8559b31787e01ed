// src/rewrite/target.rs

use crate::error::RewriteError;
use crate::rewrite::rules::{RewriteRule, RuleSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

static IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

pub fn is_identifier(s: &str) -> bool {
    IDENT.is_match(s)
}

/// A table name, optionally qualified by schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, RewriteError> {
        let (schema, name) = match raw.split_once('.') {
            Some((s, n)) => (Some(s), n),
            None => (None, raw),
        };
        let valid = is_identifier(name) && schema.map_or(true, is_identifier);
        if !valid {
            return Err(RewriteError::invalid_target(
                raw,
                "table name must be `table` or `schema.table` with plain identifiers",
            ));
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Identity of a target across runs: `<table>@<col>+<col>`. Two targets
/// on the same table with different columns get different keys.
pub fn target_key(table: &str, columns: &[String]) -> String {
    format!("{}@{}", table, columns.join("+"))
}

/// The unvalidated shape of a target as written in a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDef {
    pub table: String,
    pub columns: Vec<String>,
    pub rules: Vec<RewriteRule>,
}

/// One migration pass: which columns of which table, and how to rewrite them.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub table: TableName,
    pub columns: Vec<String>,
    pub rules: RuleSet,
}

impl TargetSpec {
    pub fn new(
        table: &str,
        columns: Vec<String>,
        rules: Vec<RewriteRule>,
    ) -> Result<Self, RewriteError> {
        let table = TableName::parse(table)?;
        if columns.is_empty() {
            return Err(RewriteError::invalid_target(
                table.to_string(),
                "no columns given",
            ));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !is_identifier(column) {
                return Err(RewriteError::invalid_target(
                    table.to_string(),
                    format!("`{}` is not a valid column name", column),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(RewriteError::invalid_target(
                    table.to_string(),
                    format!("column `{}` listed twice", column),
                ));
            }
        }
        let rules = RuleSet::new(rules)?;
        Ok(Self {
            table,
            columns,
            rules,
        })
    }

    pub fn key(&self) -> String {
        target_key(&self.table.to_string(), &self.columns)
    }
}

impl TryFrom<TargetDef> for TargetSpec {
    type Error = RewriteError;

    fn try_from(def: TargetDef) -> Result<Self, Self::Error> {
        TargetSpec::new(&def.table, def.columns, def.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<RewriteRule> {
        vec![RewriteRule::new("cdn.cogitize.tech", "media.example.com")]
    }

    #[test]
    fn parses_qualified_table() {
        let t = TableName::parse("public.article").unwrap();
        assert_eq!(t.schema.as_deref(), Some("public"));
        assert_eq!(t.name, "article");
        assert_eq!(t.to_string(), "public.article");

        let bare = TableName::parse("course").unwrap();
        assert_eq!(bare.schema, None);
        assert_eq!(bare.to_string(), "course");
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(TableName::parse("article; drop table x").is_err());
        assert!(TableName::parse("a.b.c").is_err());
        assert!(TableName::parse("").is_err());
        assert!(TargetSpec::new("article", vec!["bo\"dy".into()], rules()).is_err());
    }

    #[test]
    fn rejects_empty_and_duplicate_columns() {
        assert!(matches!(
            TargetSpec::new("article", vec![], rules()),
            Err(RewriteError::InvalidTarget { .. })
        ));
        assert!(matches!(
            TargetSpec::new("article", vec!["body".into(), "body".into()], rules()),
            Err(RewriteError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn key_includes_columns() {
        let body = TargetSpec::new("public.article", vec!["body".into()], rules()).unwrap();
        let media = TargetSpec::new(
            "public.article",
            vec!["image".into(), "localized_image".into()],
            rules(),
        )
        .unwrap();
        assert_eq!(body.key(), "public.article@body");
        assert_eq!(media.key(), "public.article@image+localized_image");
    }

    #[test]
    fn rejects_missing_rules() {
        assert!(matches!(
            TargetSpec::new("article", vec!["body".into()], vec![]),
            Err(RewriteError::InvalidRule { .. })
        ));
    }
}
