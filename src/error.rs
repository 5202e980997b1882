//! Error types for dependency-safe column modification.

use thiserror::Error;

use crate::db::migrator::ModificationPhase;
use crate::security::ValidationError;

/// Main error type for scan, modification and recovery operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration error (unreadable file, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table or column name rejected before touching the database
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// A catalog or DDL call was made before `connect`
    #[error("Not connected to SQL Server")]
    NotConnected,

    /// TCP or TDS handshake failure
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Catalog query failed while scanning a table
    #[error("Catalog query failed for {table}: {message}")]
    Catalog { table: String, message: String },

    /// A DDL statement was rejected by the server
    #[error("Statement failed: {sql}\n  Reason: {message}")]
    Statement { sql: String, message: String },

    /// The target column does not exist
    #[error("Column {column} not found on table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Caller-supplied column mutation failed
    #[error("Column mutation failed: {0}")]
    Mutation(String),

    /// A modification stopped after changing the schema
    #[error("{phase} failed for {table}.{column}: {source}")]
    Phase {
        phase: ModificationPhase,
        table: String,
        column: String,
        #[source]
        source: Box<GuardError>,
        dropped: Vec<String>,
        restored: Vec<String>,
    },

    /// Compensation journal could not be read or written
    #[error("Journal error: {0}")]
    Journal(String),

    /// Raw driver error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// IO error (config, journal and script files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GuardError {
    /// Create a Statement error for a failed DDL statement
    pub fn statement(sql: impl Into<String>, message: impl ToString) -> Self {
        GuardError::Statement {
            sql: sql.into(),
            message: message.to_string(),
        }
    }

    /// Create a Catalog error for a failed scan query
    pub fn catalog(table: impl Into<String>, message: impl ToString) -> Self {
        GuardError::Catalog {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Objects that were dropped but are still missing from the schema.
    pub fn missing_objects(&self) -> Vec<String> {
        match self {
            GuardError::Phase {
                dropped, restored, ..
            } => dropped
                .iter()
                .filter(|name| !restored.contains(name))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            GuardError::Config(_) | GuardError::Validation(_) => 2,
            GuardError::NotConnected
            | GuardError::Connection(_)
            | GuardError::Catalog { .. }
            | GuardError::Statement { .. }
            | GuardError::ColumnNotFound { .. }
            | GuardError::Database(_) => 3,
            GuardError::Phase { .. } => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        if let GuardError::Phase {
            dropped, restored, ..
        } = self
        {
            output.push_str(&format!("\nDropped: {}", join_or_none(dropped)));
            output.push_str(&format!("\nRestored: {}", join_or_none(restored)));
            output.push_str(&format!(
                "\nStill missing: {}",
                join_or_none(&self.missing_objects())
            ));
        }

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

/// Result type alias for colguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
