use super::{ConnectionConfig, DatabaseConnector};
use crate::db::schema::{
    CheckConstraintDependency, ColumnDefinition, DefaultConstraintDependency,
    ForeignKeyDependency, IndexDependency, IndexType, TableName, UniqueConstraintDependency,
};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type TdsClient = Client<Compat<TcpStream>>;

const COLUMN_DEFINITION_SQL: &str = "\
    SELECT DATA_TYPE, IS_NULLABLE, CHARACTER_MAXIMUM_LENGTH, \
           NUMERIC_PRECISION, NUMERIC_SCALE, DATETIME_PRECISION \
    FROM INFORMATION_SCHEMA.COLUMNS \
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 AND COLUMN_NAME = @P3";

// Every column row of each rowstore index that contains the target column.
// Indexes backing UNIQUE constraints are captured separately.
const INDEX_DEPENDENCIES_SQL: &str = "\
    SELECT i.name, i.type_desc, i.is_unique, i.is_primary_key, \
           ic.is_included_column, c.name, ic.key_ordinal, ic.is_descending_key, \
           i.filter_definition \
    FROM sys.indexes i \
    JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
    JOIN sys.tables t ON i.object_id = t.object_id \
    JOIN sys.schemas s ON t.schema_id = s.schema_id \
    WHERE s.name = @P1 AND t.name = @P2 \
      AND i.type IN (1, 2) AND i.is_unique_constraint = 0 \
      AND EXISTS ( \
          SELECT 1 FROM sys.index_columns ic2 \
          JOIN sys.columns c2 ON ic2.object_id = c2.object_id AND ic2.column_id = c2.column_id \
          WHERE ic2.object_id = i.object_id AND ic2.index_id = i.index_id AND c2.name = @P3) \
    ORDER BY i.name, ic.is_included_column, ic.key_ordinal, c.name";

const FOREIGN_KEY_DEPENDENCIES_SQL: &str = "\
    SELECT fk.name, pc.name, rs.name, rt.name, rc.name, \
           fk.delete_referential_action, fk.update_referential_action, \
           fkc.constraint_column_id \
    FROM sys.foreign_keys fk \
    JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
    JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
    JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
    JOIN sys.tables pt ON pt.object_id = fk.parent_object_id \
    JOIN sys.schemas ps ON ps.schema_id = pt.schema_id \
    JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id \
    JOIN sys.schemas rs ON rs.schema_id = rt.schema_id \
    WHERE ps.name = @P1 AND pt.name = @P2 \
      AND EXISTS ( \
          SELECT 1 FROM sys.foreign_key_columns fkc2 \
          JOIN sys.columns c2 ON c2.object_id = fkc2.parent_object_id AND c2.column_id = fkc2.parent_column_id \
          WHERE fkc2.constraint_object_id = fk.object_id AND c2.name = @P3) \
    ORDER BY fk.name, fkc.constraint_column_id";

// Column-level checks are bound through parent_column_id; table-level checks
// (parent_column_id = 0) are matched on the bracketed column name.
const CHECK_CONSTRAINT_DEPENDENCIES_SQL: &str = "\
    SELECT cc.name, cc.definition \
    FROM sys.check_constraints cc \
    JOIN sys.tables t ON cc.parent_object_id = t.object_id \
    JOIN sys.schemas s ON t.schema_id = s.schema_id \
    LEFT JOIN sys.columns c ON c.object_id = cc.parent_object_id AND c.column_id = cc.parent_column_id \
    WHERE s.name = @P1 AND t.name = @P2 \
      AND (c.name = @P3 OR (cc.parent_column_id = 0 AND CHARINDEX(QUOTENAME(@P3), cc.definition) > 0)) \
    ORDER BY cc.name";

const DEFAULT_CONSTRAINT_DEPENDENCIES_SQL: &str = "\
    SELECT dc.name, dc.definition, c.name \
    FROM sys.default_constraints dc \
    JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id \
    JOIN sys.tables t ON dc.parent_object_id = t.object_id \
    JOIN sys.schemas s ON t.schema_id = s.schema_id \
    WHERE s.name = @P1 AND t.name = @P2 AND c.name = @P3 \
    ORDER BY dc.name";

const UNIQUE_CONSTRAINT_DEPENDENCIES_SQL: &str = "\
    SELECT i.name, c.name, i.type_desc, ic.key_ordinal, ic.is_descending_key \
    FROM sys.indexes i \
    JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
    JOIN sys.tables t ON i.object_id = t.object_id \
    JOIN sys.schemas s ON t.schema_id = s.schema_id \
    WHERE s.name = @P1 AND t.name = @P2 AND i.is_unique_constraint = 1 \
      AND EXISTS ( \
          SELECT 1 FROM sys.index_columns ic2 \
          JOIN sys.columns c2 ON ic2.object_id = c2.object_id AND ic2.column_id = c2.column_id \
          WHERE ic2.object_id = i.object_id AND ic2.index_id = i.index_id AND c2.name = @P3) \
    ORDER BY i.name, ic.key_ordinal";

/// SQL Server connector using tiberius
pub struct SqlServerConnector {
    config: ConnectionConfig,
    client: Mutex<Option<TdsClient>>,
}

impl SqlServerConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    /// Build a tiberius Config from our ConnectionConfig and return (Config, host, port)
    fn build_tiberius_config(&self) -> Result<(Config, String, u16)> {
        if let Some(ref conn_str) = self.config.connection_string {
            let config = Config::from_ado_string(conn_str).map_err(|e| {
                GuardError::Config(format!("Failed to parse SQL Server connection string: {}", e))
            })?;
            let host = config.get_addr();
            let (host, port) = split_addr(&host)
                .unwrap_or_else(|| (self.host(), self.port()));
            return Ok((config, host, port));
        }

        let mut tib_config = Config::new();

        let host = self.host();
        let port = self.port();

        tib_config.host(&host);
        tib_config.port(port);

        if let Some(ref db) = self.config.database {
            tib_config.database(db);
        }

        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                tib_config.authentication(AuthMethod::sql_server(user, pass));
            }
            _ => {
                tib_config.authentication(AuthMethod::None);
            }
        }

        if self.config.trust_cert {
            tib_config.trust_cert();
        }
        tib_config.encryption(EncryptionLevel::Required);

        Ok((tib_config, host, port))
    }

    fn host(&self) -> String {
        self.config
            .host
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn port(&self) -> u16 {
        self.config.port.unwrap_or(1433)
    }

    /// Run a catalog query bound to (schema, table, column) and collect its rows.
    async fn catalog_rows(
        &self,
        sql: &str,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<tiberius::Row>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(GuardError::NotConnected)?;

        let mut query = Query::new(sql);
        query.bind(table.schema.clone());
        query.bind(table.name.clone());
        query.bind(column.to_string());

        let stream = query
            .query(client)
            .await
            .map_err(|e| GuardError::catalog(table.to_string(), e))?;
        stream
            .into_first_result()
            .await
            .map_err(|e| GuardError::catalog(table.to_string(), e))
    }
}

/// Split a `host:port` address as returned by `Config::get_addr`.
fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.to_string(), port))
}

fn text(row: &tiberius::Row, idx: usize) -> Result<String> {
    Ok(row.try_get::<&str, _>(idx)?.unwrap_or_default().to_string())
}

#[async_trait]
impl DatabaseConnector for SqlServerConnector {
    async fn connect(&mut self) -> Result<()> {
        let (tib_config, host, port) = self.build_tiberius_config()?;
        let addr = format!("{}:{}", host, port);
        let timeout = Duration::from_secs(self.config.connection_timeout_secs.max(1));

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                GuardError::Connection(format!("Timed out connecting to SQL Server at {}", addr))
            })?
            .map_err(|e| {
                GuardError::Connection(format!("Failed to connect to SQL Server at {}: {}", addr, e))
            })?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(tib_config, tcp.compat_write())
            .await
            .map_err(|e| GuardError::Connection(format!("TDS connection/authentication failed: {}", e)))?;

        log::debug!("Connected to SQL Server at {}", addr);
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn column_definition(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Option<ColumnDefinition>> {
        let rows = self.catalog_rows(COLUMN_DEFINITION_SQL, table, column).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let data_type = text(row, 0)?;
        let nullable: &str = row.try_get(1)?.unwrap_or("YES");
        let max_length: Option<i32> = row.try_get(2)?;
        let precision: Option<u8> = row.try_get(3)?;
        let scale: Option<i32> = row.try_get(4)?;
        let datetime_precision: Option<i16> = row.try_get(5)?;

        Ok(Some(ColumnDefinition {
            data_type,
            max_length,
            precision: precision.map(|v| v as i32),
            scale: scale.or(datetime_precision.map(|v| v as i32)),
            is_nullable: nullable == "YES",
        }))
    }

    async fn index_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<IndexDependency>> {
        let rows = self.catalog_rows(INDEX_DEPENDENCIES_SQL, table, column).await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let type_desc: &str = row.try_get(1)?.unwrap_or("NONCLUSTERED");
            let filter: Option<&str> = row.try_get(8)?;
            indexes.push(IndexDependency {
                name: text(row, 0)?,
                index_type: IndexType::from_type_desc(type_desc),
                is_unique: row.try_get(2)?.unwrap_or(false),
                is_primary_key: row.try_get(3)?.unwrap_or(false),
                is_included_column: row.try_get(4)?.unwrap_or(false),
                column: text(row, 5)?,
                key_ordinal: row.try_get(6)?.unwrap_or(0),
                is_descending: row.try_get(7)?.unwrap_or(false),
                filter_definition: filter.map(|s| s.to_string()),
            });
        }
        Ok(indexes)
    }

    async fn foreign_key_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<ForeignKeyDependency>> {
        let rows = self
            .catalog_rows(FOREIGN_KEY_DEPENDENCIES_SQL, table, column)
            .await?;

        let mut foreign_keys = Vec::with_capacity(rows.len());
        for row in &rows {
            foreign_keys.push(ForeignKeyDependency {
                name: text(row, 0)?,
                column: text(row, 1)?,
                referenced_schema: text(row, 2)?,
                referenced_table: text(row, 3)?,
                referenced_column: text(row, 4)?,
                delete_action: row.try_get(5)?.unwrap_or(0),
                update_action: row.try_get(6)?.unwrap_or(0),
                ordinal: row.try_get(7)?.unwrap_or(0),
            });
        }
        Ok(foreign_keys)
    }

    async fn check_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<CheckConstraintDependency>> {
        let rows = self
            .catalog_rows(CHECK_CONSTRAINT_DEPENDENCIES_SQL, table, column)
            .await?;

        let mut checks = Vec::with_capacity(rows.len());
        for row in &rows {
            checks.push(CheckConstraintDependency {
                name: text(row, 0)?,
                definition: text(row, 1)?,
            });
        }
        Ok(checks)
    }

    async fn default_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<DefaultConstraintDependency>> {
        let rows = self
            .catalog_rows(DEFAULT_CONSTRAINT_DEPENDENCIES_SQL, table, column)
            .await?;

        let mut defaults = Vec::with_capacity(rows.len());
        for row in &rows {
            defaults.push(DefaultConstraintDependency {
                name: text(row, 0)?,
                definition: text(row, 1)?,
                column: text(row, 2)?,
            });
        }
        Ok(defaults)
    }

    async fn unique_constraint_dependencies(
        &self,
        table: &TableName,
        column: &str,
    ) -> Result<Vec<UniqueConstraintDependency>> {
        let rows = self
            .catalog_rows(UNIQUE_CONSTRAINT_DEPENDENCIES_SQL, table, column)
            .await?;

        let mut uniques = Vec::with_capacity(rows.len());
        for row in &rows {
            let type_desc: &str = row.try_get(2)?.unwrap_or("NONCLUSTERED");
            uniques.push(UniqueConstraintDependency {
                name: text(row, 0)?,
                column: text(row, 1)?,
                index_type: IndexType::from_type_desc(type_desc),
                key_ordinal: row.try_get(3)?.unwrap_or(0),
                is_descending: row.try_get(4)?.unwrap_or(false),
            });
        }
        Ok(uniques)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(GuardError::NotConnected)?;

        client
            .simple_query(sql)
            .await
            .map_err(|e| GuardError::statement(sql, e))?
            .into_results()
            .await
            .map_err(|e| GuardError::statement(sql, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_from_params() {
        let config = ConnectionConfig {
            host: Some("myserver".to_string()),
            port: Some(1434),
            database: Some("marketplace".to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        };
        let connector = SqlServerConnector::new(config);
        let (_tib_config, host, port) = connector.build_tiberius_config().unwrap();
        assert_eq!(host, "myserver");
        assert_eq!(port, 1434);
    }

    #[test]
    fn test_build_config_defaults() {
        let connector = SqlServerConnector::new(ConnectionConfig::default());
        let (_tib_config, host, port) = connector.build_tiberius_config().unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1433);
    }

    #[test]
    fn test_build_config_from_connection_string() {
        let config = ConnectionConfig {
            connection_string: Some(
                "Server=dbhost,1533;Database=marketplace;User Id=sa;Password=pass;"
                    .to_string(),
            ),
            ..Default::default()
        };
        let connector = SqlServerConnector::new(config);
        let (_tib_config, host, port) = connector.build_tiberius_config().unwrap();
        assert_eq!(host, "dbhost");
        assert_eq!(port, 1533);
    }

    #[test]
    fn test_split_addr() {
        assert_eq!(split_addr("db:1433"), Some(("db".to_string(), 1433)));
        assert_eq!(split_addr("db"), None);
        assert_eq!(split_addr("db:notaport"), None);
    }

    #[tokio::test]
    async fn test_not_connected_by_default() {
        let connector = SqlServerConnector::new(ConnectionConfig::default());
        assert!(!connector.is_connected().await);
    }

    #[tokio::test]
    async fn test_catalog_query_requires_connection() {
        let connector = SqlServerConnector::new(ConnectionConfig::default());
        let table = TableName::new("dbo", "users");
        let err = connector
            .index_dependencies(&table, "email")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::NotConnected));
        let err = connector.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, GuardError::NotConnected));
    }
}
