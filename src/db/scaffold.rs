//! Migration script scaffolding.
//!
//! Writes a reviewable `.sql` file with an UP and a DOWN section, each of
//! which drops the column's dependencies, alters the column and recreates
//! them. Unique constraints are left out of scaffolded scripts.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use super::migrator::AlterColumn;
use super::plan::{build_plan, DdlStep, DependencyKind, PrimaryKeyDetection};
use super::schema::{ColumnDefinition, ColumnDependencies, TableName};
use super::sql_generator::{quote_ident, SqlGenerator};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationScript {
    pub file_name: String,
    pub header: Vec<String>,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl MigrationScript {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str("-- ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n-- ==== UP ====\n");
        push_statements(&mut out, &self.up);
        out.push_str("\n-- ==== DOWN ====\n");
        push_statements(&mut out, &self.down);
        out
    }

    /// Write the script into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        fs::write(&path, self.render())?;
        log::info!("Wrote migration script {:?}", path);
        Ok(path)
    }
}

fn push_statements(out: &mut String, statements: &[String]) {
    for stmt in statements {
        out.push_str(stmt);
        if !stmt.starts_with("--") {
            out.push(';');
        }
        out.push('\n');
    }
}

/// Build a migration script for changing `table.column`.
///
/// `target` fills in the UP alter; without it a placeholder comment is
/// emitted. `original` fills in the DOWN alter the same way.
pub fn scaffold_migration(
    table: &TableName,
    column: &str,
    deps: &ColumnDependencies,
    original: Option<&ColumnDefinition>,
    target: Option<&AlterColumn>,
    pk_detection: PrimaryKeyDetection,
    created_at: DateTime<Utc>,
) -> MigrationScript {
    let gen = SqlGenerator::new(table);
    let plan = build_plan(table, deps, pk_detection);

    let keep = |s: &&DdlStep| s.kind != DependencyKind::UniqueConstraint;
    let drops: Vec<String> = plan.drops.iter().filter(keep).map(|s| s.sql.clone()).collect();
    let recreates: Vec<String> = plan
        .recreates
        .iter()
        .filter(keep)
        .map(|s| s.sql.clone())
        .collect();

    let placeholder = format!(
        "-- ALTER TABLE {} ALTER COLUMN {} <type> NULL|NOT NULL",
        gen.qualified_table(),
        quote_ident(column)
    );

    let up_alter = match target {
        Some(t) => gen.alter_column(column, t.data_type.trim(), t.nullable),
        None => placeholder.clone(),
    };
    let down_alter = match original {
        Some(def) => gen.restore_column(column, def),
        None => placeholder,
    };

    let section = |alter: String| {
        let mut stmts = drops.clone();
        stmts.push(alter);
        stmts.extend(recreates.iter().cloned());
        stmts
    };

    let mut header = vec![
        format!("Modify {}.{}", table, column),
        format!("Generated {}", created_at.to_rfc3339()),
    ];
    if let Some(def) = original {
        header.push(format!("Current definition: {}", def.column_spec()));
    }
    if !plan.skipped_primary_keys.is_empty() {
        header.push(format!(
            "Primary key left in place: {}",
            plan.skipped_primary_keys.join(", ")
        ));
    }
    let skipped_unique: Vec<&str> = plan
        .drops
        .iter()
        .filter(|s| s.kind == DependencyKind::UniqueConstraint)
        .map(|s| s.object_name.as_str())
        .collect();
    if !skipped_unique.is_empty() {
        header.push(format!(
            "Unique constraints not handled: {}",
            skipped_unique.join(", ")
        ));
    }

    MigrationScript {
        file_name: format!(
            "{}_modify_{}_{}.sql",
            created_at.format("%Y%m%d%H%M%S"),
            table.name,
            column
        ),
        header,
        up: section(up_alter),
        down: section(down_alter),
    }
}
