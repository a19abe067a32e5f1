// =====================================================
// CONFIGURATION
// Transfer tuning and ClickHouse connection defaults, read from the environment
// =====================================================

use crate::data_transfer::sink::DEFAULT_BATCH_SIZE;
use crate::db_types::ConnectionDescriptor;
use crate::error::TransferError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, TransferError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            TransferError::validation(format!("{} has an invalid value '{}'", key, raw))
        }),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    /// Rows per write operation.
    pub batch_size: usize,
    /// Bound on connection acquisition and on every query/insert call.
    pub timeout: Duration,
    /// Where exports land as `<table>_export.csv`.
    pub output_dir: PathBuf,
    pub preview_limit: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_dir: PathBuf::from("."),
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }
}

impl TransferSettings {
    pub fn from_env() -> Result<Self, TransferError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransferError> {
        let defaults = Self::default();

        let batch_size = parse_var::<usize>(&lookup, "FLATBRIDGE_BATCH_SIZE")?
            .unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(TransferError::validation(
                "FLATBRIDGE_BATCH_SIZE must be greater than zero",
            ));
        }

        let timeout = parse_var::<u64>(&lookup, "FLATBRIDGE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(TransferError::validation(
                "FLATBRIDGE_TIMEOUT_SECS must be greater than zero",
            ));
        }

        Ok(Self {
            batch_size,
            timeout,
            output_dir: lookup("FLATBRIDGE_OUTPUT_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            preview_limit: parse_var::<usize>(&lookup, "FLATBRIDGE_PREVIEW_LIMIT")?
                .unwrap_or(defaults.preview_limit),
        })
    }
}

/// Connection used when the caller does not name one.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickHouseDefaults {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for ClickHouseDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
        }
    }
}

impl ClickHouseDefaults {
    pub fn from_env() -> Result<Self, TransferError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransferError> {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("CLICKHOUSE_HOST").unwrap_or(defaults.host),
            port: parse_var::<u16>(&lookup, "CLICKHOUSE_PORT")?.unwrap_or(defaults.port),
            database: lookup("CLICKHOUSE_DATABASE").unwrap_or(defaults.database),
            user: lookup("CLICKHOUSE_USER").unwrap_or(defaults.user),
            password: lookup("CLICKHOUSE_PASSWORD").unwrap_or(defaults.password),
        })
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.user.clone(),
            credential: self.password.clone(),
        }
    }
}
