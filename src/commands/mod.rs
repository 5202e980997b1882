//! Command handlers behind the `colguard` binary.

pub mod migration;
pub mod schema;

pub use migration::{modify, recover, ModifyArgs};
pub use schema::{plan, scaffold, scan};

use anyhow::Context;
use serde::Serialize;

use crate::config::AppConfig;
use crate::db::connectors::sqlserver::SqlServerConnector;
use crate::db::connectors::DatabaseConnector;
use crate::db::schema::TableName;
use crate::error::GuardError;
use crate::security::validate_identifier;

/// Parse and validate a table/column pair before any connection is made.
pub(crate) fn target(table: &str, column: &str) -> Result<(TableName, String), GuardError> {
    let table = TableName::parse(table)?;
    validate_identifier(column)?;
    Ok((table, column.to_string()))
}

pub(crate) async fn connect(config: &AppConfig) -> anyhow::Result<SqlServerConnector> {
    let mut conn = SqlServerConnector::new(config.connection.clone());
    conn.connect().await.context("connecting to SQL Server")?;
    Ok(conn)
}

pub(crate) async fn disconnect(mut conn: SqlServerConnector) {
    if let Err(e) = conn.disconnect().await {
        log::warn!("Error while closing connection: {}", e);
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", text);
    Ok(())
}
