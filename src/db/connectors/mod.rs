pub mod memory;
pub mod sqlserver;

use crate::db::schema::{
    CheckConstraintDependency, ColumnDefinition, DefaultConstraintDependency,
    ForeignKeyDependency, IndexDependency, TableName, UniqueConstraintDependency,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection configuration for a SQL Server database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_string: Option<String>,
    pub trust_cert: bool,
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            connection_string: None,
            trust_cert: true,
            connection_timeout_secs: 30,
        }
    }
}

/// Catalog reads and DDL execution needed to modify a column safely.
///
/// Dependency queries return one record per catalog row. An unknown table or
/// column yields empty lists rather than an error.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Connect to the database
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the database
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the connection is active
    async fn is_connected(&self) -> bool;

    /// Current definition of a column, or `None` if table or column is unknown
    async fn column_definition(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Option<ColumnDefinition>>;

    /// Index-column rows of every non-constraint index touching the column
    async fn index_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<IndexDependency>>;

    /// Column pairs of every foreign key on the table touching the column
    async fn foreign_key_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<ForeignKeyDependency>>;

    /// Check constraints bound to or mentioning the column
    async fn check_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<CheckConstraintDependency>>;

    /// Default constraints bound to the column
    async fn default_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<DefaultConstraintDependency>>;

    /// Column rows of every UNIQUE constraint touching the column
    async fn unique_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<UniqueConstraintDependency>>;

    /// Execute a single DDL statement
    async fn execute(&self, sql: &str) -> Result<()>;
}
