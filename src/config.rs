// src/config.rs

use crate::error::RewriteError;
use crate::rewrite::target::{TargetDef, TargetSpec};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;

/// Database settings. Passed explicitly to the store; nothing here is global.
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub ssl_mode: PgSslMode,
    /// When set, used as-is and the fields above are informational only.
    pub url: Option<String>,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("url", &self.url.as_ref().map(|_| "***"))
            .finish()
    }
}

fn parse_ssl_mode(raw: &str) -> Result<PgSslMode, RewriteError> {
    match raw.trim().to_lowercase().as_str() {
        "disable" | "false" => Ok(PgSslMode::Disable),
        "allow" => Ok(PgSslMode::Allow),
        "prefer" => Ok(PgSslMode::Prefer),
        "require" | "true" => Ok(PgSslMode::Require),
        "verify-ca" => Ok(PgSslMode::VerifyCa),
        "verify-full" => Ok(PgSslMode::VerifyFull),
        other => Err(RewriteError::Config(format!(
            "DB_SSLMODE `{}` is not one of disable, allow, prefer, require, verify-ca, verify-full",
            other
        ))),
    }
}

impl DbConfig {
    /// Read `DATABASE_URL` or the `DB_*` variables, loading `.env` first.
    pub fn from_env() -> Result<Self, RewriteError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RewriteError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL");
        let required = |key: &str| {
            lookup(key).ok_or_else(|| RewriteError::Config(format!("{} is not set", key)))
        };

        let port = match lookup("DB_PORT") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| RewriteError::Config(format!("DB_PORT `{}` is not a port", p)))?,
            None => DEFAULT_PORT,
        };
        let ssl_mode = match lookup("DB_SSLMODE") {
            Some(mode) => parse_ssl_mode(&mode)?,
            None => PgSslMode::Prefer,
        };

        let (user, database) = if url.is_some() {
            (
                lookup("DB_USER").unwrap_or_default(),
                lookup("DB_NAME").unwrap_or_default(),
            )
        } else {
            (required("DB_USER")?, required("DB_NAME")?)
        };

        Ok(Self {
            host: lookup("DB_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            user,
            password: lookup("DB_PASSWORD"),
            database,
            ssl_mode,
            url,
        })
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url);
        }
        let mut opts = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .ssl_mode(self.ssl_mode);
        if let Some(password) = &self.password {
            opts = opts.password(password);
        }
        Ok(opts)
    }
}

/// A migration plan: the Target Specs of one run, in order.
///
/// ```yaml
/// targets:
///   - table: article
///     columns: [body, localized_image]
///     rules:
///       - from: cdn.cogitize.tech
///         to: cryptomannn.s3.eu-central-1.amazonaws.com
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub targets: Vec<TargetDef>,
}

impl Plan {
    pub fn from_yaml(raw: &str) -> Result<Self, RewriteError> {
        serde_yaml::from_str(raw).map_err(|e| RewriteError::Config(format!("bad plan: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, RewriteError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RewriteError::Config(format!("reading plan {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Validate every target. Fails on the first invalid one.
    pub fn into_targets(self) -> Result<Vec<TargetSpec>, RewriteError> {
        if self.targets.is_empty() {
            return Err(RewriteError::Config("plan has no targets".into()));
        }
        self.targets.into_iter().map(TargetSpec::try_from).collect()
    }
}
