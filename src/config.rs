//! Runtime configuration from environment variables (and `.env`)

use crate::error::LedgerError;
use crate::intake::SessionConfig;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LEDGER_PATH: &str = "data/ledger.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub ledger_path: PathBuf,
    pub sessions: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            sessions: SessionConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Config(format!("{} has an invalid value: {:?}", name, raw)))
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(raw) => parse_var("PORT", &raw)?,
            None => defaults.port,
        };

        let ledger_path = lookup("LEDGER_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.ledger_path);

        let ttl = match lookup("INTAKE_SESSION_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_var("INTAKE_SESSION_TTL_SECS", &raw)?),
            None => defaults.sessions.ttl,
        };

        let max_sessions: usize = match lookup("INTAKE_MAX_SESSIONS") {
            Some(raw) => parse_var("INTAKE_MAX_SESSIONS", &raw)?,
            None => defaults.sessions.max_sessions,
        };
        if max_sessions == 0 {
            return Err(LedgerError::Config(
                "INTAKE_MAX_SESSIONS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            port,
            ledger_path,
            sessions: SessionConfig { ttl, max_sessions },
        })
    }
}
