use crate::data_transfer::codec::{self, DEFAULT_DELIMITER};
use crate::data_transfer::mapper::{validate_mapping_rules, ColumnMappingRule};
use crate::db_types::{ConnectionDescriptor, Row};
use crate::error::TransferError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

// --- Request ---

/// Where flat-file rows come from.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlatFileInput {
    /// Delimited text with a header row.
    Text { text: String },
    /// Delimited file on local disk with a header row.
    Path { path: PathBuf },
    /// Records already parsed by the caller. Empty `columns` = union of keys.
    Records {
        #[serde(default)]
        columns: Vec<String>,
        rows: Vec<Row>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceSpec {
    #[serde(rename_all = "camelCase")]
    Database {
        connection: ConnectionDescriptor,
        table: String,
        columns: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    FlatFile {
        input: FlatFileInput,
        #[serde(default = "default_delimiter")]
        delimiter: char,
        #[serde(default = "default_true")]
        validate: bool,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TargetSpec {
    #[serde(rename_all = "camelCase")]
    Database {
        connection: ConnectionDescriptor,
        table: String,
        #[serde(default)]
        mapping: Vec<ColumnMappingRule>,
    },
    /// `table` is the output filename stem.
    #[serde(rename_all = "camelCase")]
    FlatFile {
        table: String,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Database -> flat file
    Export,
    /// Flat file -> database
    Import,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: SourceSpec,
    pub target: TargetSpec,
}

fn require_non_blank(value: &str, label: &str) -> Result<(), TransferError> {
    if value.trim().is_empty() {
        return Err(TransferError::validation(format!("{} is required", label)));
    }
    Ok(())
}

fn validate_connection(connection: &ConnectionDescriptor, side: &str) -> Result<(), TransferError> {
    require_non_blank(&connection.host, &format!("{} host", side))?;
    require_non_blank(&connection.database, &format!("{} database", side))?;
    require_non_blank(&connection.username, &format!("{} username", side))?;
    if connection.port == 0 {
        return Err(TransferError::validation(format!("{} port is required", side)));
    }
    Ok(())
}

impl TransferRequest {
    pub fn direction(&self) -> Result<TransferDirection, TransferError> {
        match (&self.source, &self.target) {
            (SourceSpec::Database { .. }, TargetSpec::FlatFile { .. }) => Ok(TransferDirection::Export),
            (SourceSpec::FlatFile { .. }, TargetSpec::Database { .. }) => Ok(TransferDirection::Import),
            (SourceSpec::Database { .. }, TargetSpec::Database { .. }) => Err(TransferError::validation(
                "Database to database transfers are not supported; one side must be a flat file",
            )),
            (SourceSpec::FlatFile { .. }, TargetSpec::FlatFile { .. }) => Err(TransferError::validation(
                "Flat file to flat file transfers are not supported; one side must be a database",
            )),
        }
    }

    /// Shape checks only; performs no I/O.
    pub fn validate(&self) -> Result<TransferDirection, TransferError> {
        let direction = self.direction()?;

        match &self.source {
            SourceSpec::Database {
                connection,
                table,
                columns,
            } => {
                validate_connection(connection, "Source")?;
                require_non_blank(table, "Source table")?;
                if columns.is_empty() {
                    return Err(TransferError::validation(
                        "At least one column must be selected",
                    ));
                }
                let mut seen = HashSet::new();
                for column in columns {
                    require_non_blank(column, "Column name")?;
                    if !seen.insert(column.as_str()) {
                        return Err(TransferError::validation(format!(
                            "Column '{}' is selected more than once",
                            column
                        )));
                    }
                }
            }
            SourceSpec::FlatFile {
                input, delimiter, ..
            } => {
                codec::delimiter_byte(*delimiter)?;
                match input {
                    FlatFileInput::Text { text } if text.trim().is_empty() => {
                        return Err(TransferError::validation("No data to insert"));
                    }
                    FlatFileInput::Records { rows, .. } if rows.is_empty() => {
                        return Err(TransferError::validation("No data to insert"));
                    }
                    FlatFileInput::Path { path } if path.as_os_str().is_empty() => {
                        return Err(TransferError::validation("Flat file path is required"));
                    }
                    _ => {}
                }
            }
        }

        match &self.target {
            TargetSpec::Database {
                connection,
                table,
                mapping,
            } => {
                validate_connection(connection, "Target")?;
                require_non_blank(table, "Target table")?;
                validate_mapping_rules(mapping)?;
            }
            TargetSpec::FlatFile { table, delimiter } => {
                require_non_blank(table, "Target table")?;
                if table.contains(['/', '\\']) || table.contains("..") {
                    return Err(TransferError::validation(format!(
                        "Target table '{}' cannot be used as a file name",
                        table
                    )));
                }
                codec::delimiter_byte(*delimiter)?;
            }
        }

        Ok(direction)
    }
}

// --- Status ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub id: String,
    pub state: TransferState,
    /// Advisory percentage, never decreasing within one transfer.
    pub progress: u8,
    pub records_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TransferDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferStatus {
    pub fn pending(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TransferState::Pending,
            progress: 0,
            records_processed: 0,
            error: None,
            error_kind: None,
            direction: None,
            output_path: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == TransferState::Failed && self.error_kind.as_deref() == Some("cancelled")
    }
}
