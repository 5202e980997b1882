use anyhow::{bail, Context};
use serde::Serialize;

use super::{connect, disconnect, print_json, target};
use crate::config::AppConfig;
use crate::db::connectors::memory::RecordingConnector;
use crate::db::journal::CompensationJournal;
use crate::db::migrator::{self, safe_column_modification, AlterColumn, ColumnMutation};

/// Arguments of `colguard modify`.
#[derive(Debug, Clone)]
pub struct ModifyArgs {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub dry_run: bool,
}

#[derive(Serialize)]
struct DryRunOutput<'a> {
    mutation: &'a str,
    statements: Vec<String>,
}

/// Run the safe modification, or print its statements with `dry_run`.
pub async fn modify(config: &AppConfig, args: &ModifyArgs, json: bool) -> anyhow::Result<()> {
    let (table, column) = target(&args.table, &args.column)?;
    let mut mutation = AlterColumn::new(args.data_type.as_str(), args.nullable);
    if let Some(expr) = &args.default {
        mutation = mutation.with_default(expr.as_str());
    }
    mutation.validate()?;

    let conn = connect(config).await?;

    if args.dry_run {
        let recorder = RecordingConnector::new(&conn);
        let result = safe_column_modification(
            &recorder,
            &table,
            &column,
            &mutation,
            &config.modification,
            None,
        )
        .await;
        let statements = recorder.recorded();
        drop(recorder);
        disconnect(conn).await;
        result.with_context(|| format!("planning modification of {}.{}", table, column))?;

        if json {
            return print_json(&DryRunOutput {
                mutation: &mutation.describe(),
                statements,
            });
        }
        println!("-- dry run: {} on {}.{}", mutation.describe(), table, column);
        for sql in statements {
            println!("{};", sql);
        }
        return Ok(());
    }

    let journal = CompensationJournal::new(config.journal_path.clone());
    let result = safe_column_modification(
        &conn,
        &table,
        &column,
        &mutation,
        &config.modification,
        Some(&journal),
    )
    .await;
    disconnect(conn).await;
    let report = result?;

    if json {
        return print_json(&report);
    }
    println!("{}", report.summary_text());
    Ok(())
}

/// Replay pending restores recorded in the journal.
pub async fn recover(config: &AppConfig, run_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let journal = CompensationJournal::new(config.journal_path.clone());
    let conn = connect(config).await?;
    let result = migrator::recover(&conn, &journal, run_id).await;
    disconnect(conn).await;
    let report =
        result.with_context(|| format!("recovering from journal {:?}", journal.path()))?;

    if json {
        print_json(&report)?;
    } else {
        match &report.run_id {
            Some(id) => println!("Run {}", id),
            None => println!("No runs recorded in {:?}", journal.path()),
        }
        for name in &report.restored {
            println!("  restored  {}", name);
        }
        for name in &report.failed {
            println!("  failed    {}", name);
        }
    }

    if !report.failed.is_empty() {
        bail!(
            "{} object(s) could not be restored: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    Ok(())
}
