//! Connectors that never touch a server.
//!
//! `MemoryConnector` serves a fixed catalog and records every statement it is
//! asked to execute; statements can be made to fail by substring. It backs the
//! test suites. `RecordingConnector` wraps a live connector, forwards catalog
//! reads, and captures DDL instead of running it, which is how dry runs work.

use super::DatabaseConnector;
use crate::db::schema::{
    CheckConstraintDependency, ColumnDefinition, ColumnDependencies, DefaultConstraintDependency,
    ForeignKeyDependency, IndexDependency, TableName, UniqueConstraintDependency,
};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

type ColumnKey = (TableName, String);

/// In-memory catalog fixture.
#[derive(Default)]
pub struct MemoryConnector {
    columns: HashMap<ColumnKey, ColumnDefinition>,
    dependencies: HashMap<ColumnKey, ColumnDependencies>,
    failures: Mutex<Vec<String>>,
    catalog_failure: Option<String>,
    executed: Mutex<Vec<String>>,
    connected: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a column and its dependency set.
    pub fn with_column(
        mut self,
        table: &TableName,
        column: &str,
        definition: ColumnDefinition,
        dependencies: ColumnDependencies,
    ) -> Self {
        let key = (table.clone(), column.to_string());
        self.columns.insert(key.clone(), definition);
        self.dependencies.insert(key, dependencies);
        self
    }

    /// Make every statement containing `pattern` fail.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.lock_failures().push(pattern.to_string());
        self
    }

    /// Make every catalog query fail with `message`.
    pub fn fail_catalog(mut self, message: &str) -> Self {
        self.catalog_failure = Some(message.to_string());
        self
    }

    /// Stop failing statements; previously executed ones are kept.
    pub fn clear_failures(&self) {
        self.lock_failures().clear();
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lookup(&self, table: &TableName, column: &str) -> Result<ColumnDependencies> {
        if let Some(message) = &self.catalog_failure {
            return Err(GuardError::catalog(table.to_string(), message));
        }
        Ok(self
            .dependencies
            .get(&(table.clone(), column.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DatabaseConnector for MemoryConnector {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn column_definition(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Option<ColumnDefinition>> {
        if let Some(message) = &self.catalog_failure {
            return Err(GuardError::catalog(table.to_string(), message));
        }
        Ok(self
            .columns
            .get(&(table.clone(), column.to_string()))
            .cloned())
    }

    async fn index_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<IndexDependency>> {
        Ok(self.lookup(table, column)?.indexes)
    }

    async fn foreign_key_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<ForeignKeyDependency>> {
        Ok(self.lookup(table, column)?.foreign_keys)
    }

    async fn check_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<CheckConstraintDependency>> {
        Ok(self.lookup(table, column)?.check_constraints)
    }

    async fn default_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<DefaultConstraintDependency>> {
        Ok(self.lookup(table, column)?.default_constraints)
    }

    async fn unique_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<UniqueConstraintDependency>> {
        Ok(self.lookup(table, column)?.unique_constraints)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        if let Some(pattern) = self.lock_failures().iter().find(|p| sql.contains(p.as_str())) {
            return Err(GuardError::statement(
                sql,
                format!("injected failure on '{}'", pattern),
            ));
        }
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }
        Ok(())
    }
}

/// Forwards catalog reads to `inner` and records statements instead of executing them.
pub struct RecordingConnector<'a> {
    inner: &'a dyn DatabaseConnector,
    recorded: Mutex<Vec<String>>,
}

impl<'a> RecordingConnector<'a> {
    pub fn new(inner: &'a dyn DatabaseConnector) -> Self {
        Self {
            inner,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Statements that would have been executed, in order.
    pub fn recorded(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<'a> DatabaseConnector for RecordingConnector<'a> {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn column_definition(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Option<ColumnDefinition>> {
        self.inner.column_definition(table, column).await
    }

    async fn index_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<IndexDependency>> {
        self.inner.index_dependencies(table, column).await
    }

    async fn foreign_key_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<ForeignKeyDependency>> {
        self.inner.foreign_key_dependencies(table, column).await
    }

    async fn check_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<CheckConstraintDependency>> {
        self.inner.check_constraint_dependencies(table, column).await
    }

    async fn default_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<DefaultConstraintDependency>> {
        self.inner.default_constraint_dependencies(table, column).await
    }

    async fn unique_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<UniqueConstraintDependency>> {
        self.inner.unique_constraint_dependencies(table, column).await
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(sql.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ColumnDefinition {
        ColumnDefinition {
            data_type: "int".to_string(),
            max_length: None,
            precision: Some(10),
            scale: Some(0),
            is_nullable: false,
        }
    }

    #[tokio::test]
    async fn test_memory_connector_serves_fixture() {
        let table = TableName::new("dbo", "contracts");
        let deps = ColumnDependencies {
            check_constraints: vec![CheckConstraintDependency {
                name: "CK_amount".to_string(),
                definition: "([amount]>=(0))".to_string(),
            }],
            ..Default::default()
        };
        let conn = MemoryConnector::new().with_column(&table, "amount", definition(), deps);

        assert!(conn.column_definition(&table, "amount").await.unwrap().is_some());
        assert!(conn.column_definition(&table, "missing").await.unwrap().is_none());
        assert_eq!(
            conn.check_constraint_dependencies(&table, "amount")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(conn
            .index_dependencies(&TableName::new("dbo", "nope"), "amount")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_memory_connector_failure_injection() {
        let conn = MemoryConnector::new().fail_on("DROP INDEX");
        assert!(conn.execute("DROP INDEX [IX_a] ON [dbo].[t]").await.is_err());
        conn.execute("ALTER TABLE [dbo].[t] DROP CONSTRAINT [FK_a]")
            .await
            .unwrap();
        assert_eq!(conn.executed().len(), 1);

        conn.clear_failures();
        conn.execute("DROP INDEX [IX_a] ON [dbo].[t]").await.unwrap();
        assert_eq!(conn.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_connector_connect_cycle() {
        let mut conn = MemoryConnector::new();
        assert!(!conn.is_connected().await);
        conn.connect().await.unwrap();
        assert!(conn.is_connected().await);
        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_recording_connector_does_not_execute() {
        let table = TableName::new("dbo", "contracts");
        let inner = MemoryConnector::new().with_column(
            &table,
            "amount",
            definition(),
            ColumnDependencies::default(),
        );
        let recorder = RecordingConnector::new(&inner);

        recorder.execute("DROP INDEX [IX_a] ON [dbo].[contracts]").await.unwrap();
        assert_eq!(recorder.recorded().len(), 1);
        assert!(inner.executed().is_empty());
        assert!(recorder
            .column_definition(&table, "amount")
            .await
            .unwrap()
            .is_some());
    }
}
