use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

use super::{connect, disconnect, print_json, target};
use crate::config::AppConfig;
use crate::db::connectors::DatabaseConnector;
use crate::db::migrator::{AlterColumn, ColumnMutation};
use crate::db::plan::{build_plan, DependencyPlan};
use crate::db::scaffold::scaffold_migration;
use crate::db::scanner::scan_dependencies;
use crate::db::schema::{ColumnDefinition, ColumnDependencies};

#[derive(Serialize)]
struct ScanOutput<'a> {
    table: String,
    column: &'a str,
    definition: Option<ColumnDefinition>,
    dependencies: ColumnDependencies,
}

/// Print every dependency of `table.column`.
pub async fn scan(config: &AppConfig, table: &str, column: &str, json: bool) -> anyhow::Result<()> {
    let (table, column) = target(table, column)?;
    let conn = connect(config).await?;

    let definition = conn.column_definition(&table, &column).await?;
    let dependencies = scan_dependencies(&conn, &table, &column)
        .await
        .with_context(|| format!("scanning {}.{}", table, column))?;
    disconnect(conn).await;

    if json {
        return print_json(&ScanOutput {
            table: table.to_string(),
            column: &column,
            definition,
            dependencies,
        });
    }

    match &definition {
        Some(def) => println!("{}.{} {}", table, column, def.column_spec()),
        None => println!("{}.{} (not found in catalog)", table, column),
    }
    let summary = dependencies.summary();
    println!("{} dependency row(s)", summary.total());
    for idx in dependencies.index_definitions() {
        let pk = if idx.is_primary_key { " (primary key)" } else { "" };
        println!("  index        {}{}", idx.name, pk);
    }
    for fk in dependencies.foreign_key_definitions() {
        println!(
            "  foreign key  {} -> {}.{}",
            fk.name, fk.referenced_schema, fk.referenced_table
        );
    }
    for chk in &dependencies.check_constraints {
        println!("  check        {} {}", chk.name, chk.definition);
    }
    for df in &dependencies.default_constraints {
        println!("  default      {} {}", df.name, df.definition);
    }
    for uq in dependencies.unique_constraint_definitions() {
        println!("  unique       {}", uq.name);
    }
    Ok(())
}

/// Print the drop and recreate statements without executing them.
pub async fn plan(config: &AppConfig, table: &str, column: &str, json: bool) -> anyhow::Result<()> {
    let (table, column) = target(table, column)?;
    let conn = connect(config).await?;
    let dependencies = scan_dependencies(&conn, &table, &column)
        .await
        .with_context(|| format!("scanning {}.{}", table, column))?;
    disconnect(conn).await;

    let plan = build_plan(&table, &dependencies, config.modification.primary_key_detection);
    if json {
        return print_json(&plan);
    }
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &DependencyPlan) {
    if plan.is_empty() {
        println!("-- no dependencies to drop");
    }
    for name in &plan.skipped_primary_keys {
        println!("-- primary key {} stays in place", name);
    }
    println!("-- drop");
    for step in &plan.drops {
        println!("{};", step.sql);
    }
    println!("-- recreate");
    for step in &plan.recreates {
        println!("{};", step.sql);
    }
}

/// Write a migration script for `table.column` into `out_dir`.
pub async fn scaffold(
    config: &AppConfig,
    table: &str,
    column: &str,
    data_type: Option<&str>,
    nullable: bool,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let (table, column) = target(table, column)?;
    let alter = data_type.map(|t| AlterColumn::new(t, nullable));
    if let Some(a) = &alter {
        a.validate()?;
    }

    let conn = connect(config).await?;
    let original = conn.column_definition(&table, &column).await?;
    let dependencies = scan_dependencies(&conn, &table, &column)
        .await
        .with_context(|| format!("scanning {}.{}", table, column))?;
    disconnect(conn).await;

    let script = scaffold_migration(
        &table,
        &column,
        &dependencies,
        original.as_ref(),
        alter.as_ref(),
        config.modification.primary_key_detection,
        Utc::now(),
    );
    let path = script
        .write_to(out_dir)
        .with_context(|| format!("writing migration script to {:?}", out_dir))?;
    println!("{}", path.display());
    Ok(())
}
