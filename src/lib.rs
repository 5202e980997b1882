pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod security;

pub use config::AppConfig;
pub use db::connectors::{ConnectionConfig, DatabaseConnector};
pub use db::journal::CompensationJournal;
pub use db::migrator::{
    recover, safe_column_modification, AlterColumn, ColumnMutation, ModificationOptions,
    ModificationPhase, ModificationReport, SqlBatch,
};
pub use db::scanner::scan_dependencies;
pub use db::schema::{ColumnDependencies, TableName};
pub use error::{GuardError, Result};
