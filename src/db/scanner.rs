use super::connectors::DatabaseConnector;
use super::schema::{ColumnDependencies, TableName};
use crate::error::Result;
use crate::security::validate_identifier;

/// Capture every index, foreign key, check, default and unique constraint
/// that references `table.column`.
///
/// Read-only. An unknown table or column produces an empty set, which cannot
/// be told apart from a column without dependencies; callers that care check
/// `DatabaseConnector::column_definition` first. Catalog errors propagate.
pub async fn scan_dependencies(
    conn: &dyn DatabaseConnector,
    table: &TableName,
    column: &str,
) -> Result<ColumnDependencies> {
    validate_identifier(column)?;

    let deps = ColumnDependencies {
        indexes: conn.index_dependencies(table, column).await?,
        foreign_keys: conn.foreign_key_dependencies(table, column).await?,
        check_constraints: conn.check_constraint_dependencies(table, column).await?,
        default_constraints: conn.default_constraint_dependencies(table, column).await?,
        unique_constraints: conn.unique_constraint_dependencies(table, column).await?,
    };

    let summary = deps.summary();
    log::debug!(
        "Scanned {}.{}: {} index rows, {} foreign key rows, {} checks, {} defaults, {} unique rows",
        table,
        column,
        summary.indexes,
        summary.foreign_keys,
        summary.check_constraints,
        summary.default_constraints,
        summary.unique_constraints
    );

    Ok(deps)
}
