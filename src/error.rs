use thiserror::Error;

/// Every failure a transfer can hit, grouped by how the caller should react.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransferError {
    /// Malformed or incomplete request, caught before any I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unreachable host, rejected credentials or an expired timeout.
    #[error("Connection error: {message}")]
    Connection { message: String, retryable: bool },

    /// Unknown database, table or column.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed flat-file input in validate mode.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// A batch could not be written; earlier batches stay committed.
    #[error("Write error after {records_written} records: {message}")]
    Write { records_written: u64, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn validation(message: impl Into<String>) -> Self {
        TransferError::Validation(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        TransferError::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Authentication rejections are reported like other connection errors
    /// but retrying them without new credentials is pointless.
    pub fn connection_fatal(message: impl Into<String>) -> Self {
        TransferError::Connection {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(operation: &str, secs: u64) -> Self {
        TransferError::Connection {
            message: format!("{} timed out after {}s", operation, secs),
            retryable: true,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        TransferError::Schema(message.into())
    }

    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        TransferError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn write(records_written: u64, message: impl Into<String>) -> Self {
        TransferError::Write {
            records_written,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "validation",
            TransferError::Connection { .. } => "connection",
            TransferError::Schema(_) => "schema",
            TransferError::Parse { .. } => "parse",
            TransferError::Write { .. } => "write",
            TransferError::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Connection { retryable: true, .. })
    }
}

impl From<csv::Error> for TransferError {
    fn from(err: csv::Error) -> Self {
        let line = err
            .position()
            .map(|position| position.line())
            .unwrap_or_default();
        TransferError::Parse {
            line,
            message: err.to_string(),
        }
    }
}
