use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use super::connectors::DatabaseConnector;
use super::journal::{CompensationJournal, JournalEntry, JournalEvent};
use super::plan::{build_plan, DdlStep, DependencyKind, DependencyPlan, PrimaryKeyDetection};
use super::scanner::scan_dependencies;
use super::schema::{ColumnDefinition, DefaultConstraintDependency, DependencySummary, TableName};
use super::sql_generator::SqlGenerator;
use crate::error::{GuardError, Result};
use crate::security::{validate_data_type, validate_identifier};

// ---------------------------------------------------------------------------
// Phases & options
// ---------------------------------------------------------------------------

/// How far a modification got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationPhase {
    Scanned,
    Dropping,
    Dropped,
    Mutating,
    Mutated,
    Recreating,
    Recreated,
    Compensated,
}

impl fmt::Display for ModificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Knobs for `safe_column_modification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModificationOptions {
    pub primary_key_detection: PrimaryKeyDetection,
    /// Recreate already-dropped objects when a drop or the mutation fails
    pub compensate_on_failure: bool,
    /// Reject a column the catalog does not know about
    pub require_existing_column: bool,
}

impl Default for ModificationOptions {
    fn default() -> Self {
        Self {
            primary_key_detection: PrimaryKeyDetection::CatalogFlag,
            compensate_on_failure: true,
            require_existing_column: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Column mutations
// ---------------------------------------------------------------------------

/// The change applied while the column's dependencies are dropped.
#[async_trait]
pub trait ColumnMutation: Send + Sync {
    /// Short human-readable description for logs and reports.
    fn describe(&self) -> String;

    /// Checked before any DDL runs.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn apply(
        &self,
        conn: &dyn DatabaseConnector,
        table: &TableName,
        column: &str,
    ) -> Result<()>;

    /// True when the mutation installs its own default constraint, in which
    /// case captured defaults are not recreated.
    fn replaces_default(&self) -> bool {
        false
    }
}

/// `ALTER COLUMN` to a new type and nullability, optionally with a new default.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterColumn {
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

impl AlterColumn {
    pub fn new(data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            data_type: data_type.into(),
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }
}

#[async_trait]
impl ColumnMutation for AlterColumn {
    fn describe(&self) -> String {
        let null = if self.nullable { "NULL" } else { "NOT NULL" };
        match &self.default {
            Some(expr) => format!("{} {} DEFAULT {}", self.data_type.trim(), null, expr),
            None => format!("{} {}", self.data_type.trim(), null),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_data_type(&self.data_type)?;
        if let Some(expr) = &self.default {
            if expr.trim().is_empty() {
                return Err(GuardError::Mutation(
                    "default expression must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        conn: &dyn DatabaseConnector,
        table: &TableName,
        column: &str,
    ) -> Result<()> {
        let gen = SqlGenerator::new(table);
        conn.execute(&gen.alter_column(column, self.data_type.trim(), self.nullable))
            .await?;

        if let Some(expr) = &self.default {
            let default = DefaultConstraintDependency {
                name: gen.default_constraint_name(column),
                definition: expr.trim().to_string(),
                column: column.to_string(),
            };
            conn.execute(&gen.create_default_constraint(&default)).await?;
        }

        Ok(())
    }

    fn replaces_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Arbitrary statements run in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlBatch(pub Vec<String>);

#[async_trait]
impl ColumnMutation for SqlBatch {
    fn describe(&self) -> String {
        format!("batch of {} statement(s)", self.0.len())
    }

    async fn apply(
        &self,
        conn: &dyn DatabaseConnector,
        _table: &TableName,
        _column: &str,
    ) -> Result<()> {
        for sql in &self.0 {
            conn.execute(sql).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a successful modification.
#[derive(Debug, Clone, Serialize)]
pub struct ModificationReport {
    pub run_id: String,
    pub table: String,
    pub column: String,
    pub mutation: String,
    pub original_definition: Option<ColumnDefinition>,
    pub summary: DependencySummary,
    pub dropped: Vec<String>,
    pub recreated: Vec<String>,
    /// Primary key indexes left in place
    pub skipped_primary_keys: Vec<String>,
    /// Captured defaults not recreated because the mutation set a new one
    pub superseded_defaults: Vec<String>,
    pub phase: ModificationPhase,
    pub duration_ms: u64,
}

impl ModificationReport {
    /// Multi-line summary, logged once per call.
    pub fn summary_text(&self) -> String {
        let s = &self.summary;
        let mut out = format!(
            "Column modification {}.{} [{}]\n",
            self.table, self.column, self.run_id
        );
        out.push_str(&format!("  Mutation:    {}\n", self.mutation));
        if let Some(def) = &self.original_definition {
            out.push_str(&format!("  Original:    {}\n", def.column_spec()));
        }
        out.push_str(&format!(
            "  Captured:    {} index rows, {} foreign key rows, {} checks, {} defaults, {} unique rows\n",
            s.indexes, s.foreign_keys, s.check_constraints, s.default_constraints, s.unique_constraints
        ));
        out.push_str(&format!("  Dropped:     {}\n", join_or_none(&self.dropped)));
        out.push_str(&format!("  Recreated:   {}\n", join_or_none(&self.recreated)));
        if !self.skipped_primary_keys.is_empty() {
            out.push_str(&format!(
                "  Kept PK:     {}\n",
                self.skipped_primary_keys.join(", ")
            ));
        }
        if !self.superseded_defaults.is_empty() {
            out.push_str(&format!(
                "  Superseded:  {}\n",
                self.superseded_defaults.join(", ")
            ));
        }
        out.push_str(&format!(
            "  Phase:       {} in {} ms",
            self.phase, self.duration_ms
        ));
        out
    }
}

/// Outcome of replaying a journal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub run_id: Option<String>,
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Journal plumbing
// ---------------------------------------------------------------------------

struct RunLog<'a> {
    journal: Option<&'a CompensationJournal>,
    run_id: String,
    table: String,
    column: String,
}

impl RunLog<'_> {
    fn entry(&self, event: JournalEvent) -> JournalEntry {
        JournalEntry::new(&self.run_id, &self.table, &self.column, event)
    }

    /// Journal writes never abort a modification.
    fn write(&self, entry: JournalEntry) {
        if let Some(journal) = self.journal {
            if let Err(e) = journal.record(&entry) {
                log::warn!(
                    "Could not write {:?} entry to journal {:?}: {}",
                    entry.event,
                    journal.path(),
                    e
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Core public API
// ---------------------------------------------------------------------------

/// Drop everything that references `table.column`, apply `mutation`, then
/// recreate what was dropped.
///
/// The dependency set is captured in full before the first DDL statement.
/// Objects are dropped and recreated in the order indexes, foreign keys,
/// check constraints, default constraints, unique constraints; the primary
/// key index is left alone.
///
/// There is no transaction around the sequence. When a drop or the mutation
/// fails and `options.compensate_on_failure` is set, the objects dropped so
/// far are recreated; otherwise the schema is left as it is. A recreate
/// failure stops immediately. Any failure after the first successful drop is
/// returned as `GuardError::Phase` listing the dropped and restored objects.
pub async fn safe_column_modification(
    conn: &dyn DatabaseConnector,
    table: &TableName,
    column: &str,
    mutation: &dyn ColumnMutation,
    options: &ModificationOptions,
    journal: Option<&CompensationJournal>,
) -> Result<ModificationReport> {
    let start = Instant::now();

    validate_identifier(&table.schema)?;
    validate_identifier(&table.name)?;
    validate_identifier(column)?;
    mutation.validate()?;

    let original_definition = conn.column_definition(table, column).await?;
    if original_definition.is_none() {
        if options.require_existing_column {
            return Err(GuardError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        log::warn!(
            "Column {}.{} not found in catalog, continuing without dependencies",
            table,
            column
        );
    }

    let deps = scan_dependencies(conn, table, column).await?;
    let plan = build_plan(table, &deps, options.primary_key_detection);

    let run = RunLog {
        journal,
        run_id: Uuid::new_v4().to_string(),
        table: table.to_string(),
        column: column.to_string(),
    };

    let mut report = ModificationReport {
        run_id: run.run_id.clone(),
        table: run.table.clone(),
        column: run.column.clone(),
        mutation: mutation.describe(),
        original_definition,
        summary: deps.summary(),
        dropped: Vec::new(),
        recreated: Vec::new(),
        skipped_primary_keys: plan.skipped_primary_keys.clone(),
        superseded_defaults: Vec::new(),
        phase: ModificationPhase::Scanned,
        duration_ms: 0,
    };

    run.write(run.entry(JournalEvent::Started));
    log::info!(
        "Modifying {}.{}: {} object(s) to drop, {} primary key index(es) kept",
        table,
        column,
        plan.drops.len(),
        plan.skipped_primary_keys.len()
    );

    // --- Drop ---
    report.phase = ModificationPhase::Dropping;
    let mut dropped_steps = Vec::with_capacity(plan.drops.len());
    for step in &plan.drops {
        if let Err(e) = conn.execute(&step.sql).await {
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Err(abort(conn, &plan, &run, options, report, &dropped_steps, e).await);
        }
        log::info!("Dropped {} {}", step.kind, step.object_name);

        let mut entry = run
            .entry(JournalEvent::Dropped)
            .with_object(step.kind, &step.object_name);
        if let Some(recreate) = plan.recreate_for(step.kind, &step.object_name) {
            entry = entry.with_sql(&recreate.sql);
        }
        run.write(entry);
        dropped_steps.push(step);
        report.dropped.push(step.object_name.clone());
    }
    report.phase = ModificationPhase::Dropped;

    // --- Mutate ---
    report.phase = ModificationPhase::Mutating;
    log::info!("Applying {} to {}.{}", report.mutation, table, column);
    if let Err(e) = mutation.apply(conn, table, column).await {
        report.duration_ms = start.elapsed().as_millis() as u64;
        return Err(abort(conn, &plan, &run, options, report, &dropped_steps, e).await);
    }
    report.phase = ModificationPhase::Mutated;

    // --- Recreate ---
    report.phase = ModificationPhase::Recreating;
    for step in &plan.recreates {
        if step.kind == DependencyKind::DefaultConstraint && mutation.replaces_default() {
            log::info!(
                "Not recreating default constraint {}: superseded by the new default",
                step.object_name
            );
            run.write(
                run.entry(JournalEvent::Recreated)
                    .with_object(step.kind, &step.object_name),
            );
            report.superseded_defaults.push(step.object_name.clone());
            continue;
        }

        if let Err(e) = conn.execute(&step.sql).await {
            log::error!(
                "Recreating {} {} failed: {}",
                step.kind,
                step.object_name,
                e
            );
            run.write(
                run.entry(JournalEvent::Failed)
                    .with_object(step.kind, &step.object_name)
                    .with_sql(&step.sql),
            );
            report.duration_ms = start.elapsed().as_millis() as u64;
            log::error!("{}", report.summary_text());
            let mut restored = report.recreated;
            restored.extend(report.superseded_defaults);
            return Err(GuardError::Phase {
                phase: ModificationPhase::Recreating,
                table: report.table,
                column: report.column,
                source: Box::new(e),
                dropped: report.dropped,
                restored,
            });
        }
        log::info!("Recreated {} {}", step.kind, step.object_name);
        run.write(
            run.entry(JournalEvent::Recreated)
                .with_object(step.kind, &step.object_name),
        );
        report.recreated.push(step.object_name.clone());
    }
    report.phase = ModificationPhase::Recreated;
    report.duration_ms = start.elapsed().as_millis() as u64;

    run.write(run.entry(JournalEvent::Completed));
    log::info!("{}", report.summary_text());

    Ok(report)
}

/// Turn a drop or mutation failure into the error returned to the caller,
/// compensating first when enabled.
async fn abort(
    conn: &dyn DatabaseConnector,
    plan: &DependencyPlan,
    run: &RunLog<'_>,
    options: &ModificationOptions,
    mut report: ModificationReport,
    dropped_steps: &[&DdlStep],
    cause: GuardError,
) -> GuardError {
    let phase = report.phase;
    log::error!(
        "{} failed for {}.{}: {}",
        phase,
        report.table,
        report.column,
        cause
    );
    run.write(run.entry(JournalEvent::Failed));

    // Nothing changed yet
    if report.dropped.is_empty() {
        log::error!("{}", report.summary_text());
        return cause;
    }

    let restored = if options.compensate_on_failure {
        compensate(conn, plan, run, dropped_steps).await
    } else {
        log::warn!(
            "Compensation disabled, dropped objects left missing: {}",
            report.dropped.join(", ")
        );
        Vec::new()
    };
    report.recreated = restored.clone();
    log::error!("{}", report.summary_text());

    GuardError::Phase {
        phase,
        table: report.table,
        column: report.column,
        source: Box::new(cause),
        dropped: report.dropped,
        restored,
    }
}

/// Replay the recreate statements of `dropped` only. Failures are logged and
/// the remaining objects are still attempted.
async fn compensate(
    conn: &dyn DatabaseConnector,
    plan: &DependencyPlan,
    run: &RunLog<'_>,
    dropped: &[&DdlStep],
) -> Vec<String> {
    let mut restored = Vec::new();

    for step in plan.compensation_steps(dropped) {
        match conn.execute(&step.sql).await {
            Ok(()) => {
                log::info!("Compensated: recreated {} {}", step.kind, step.object_name);
                run.write(
                    run.entry(JournalEvent::Compensated)
                        .with_object(step.kind, &step.object_name),
                );
                restored.push(step.object_name.clone());
            }
            Err(e) => {
                log::error!(
                    "Compensation could not recreate {} {}: {}",
                    step.kind,
                    step.object_name,
                    e
                );
            }
        }
    }

    log::info!(
        "{} {}.{}: {} of {} dropped object(s) restored",
        ModificationPhase::Compensated,
        run.table,
        run.column,
        restored.len(),
        dropped.len()
    );
    restored
}

/// Replay the pending restores of `run_id` (or the newest run) from the
/// journal. Each replayed object is journaled as `Compensated`.
pub async fn recover(
    conn: &dyn DatabaseConnector,
    journal: &CompensationJournal,
    run_id: Option<&str>,
) -> Result<RecoveryReport> {
    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => match journal.latest_run()? {
            Some(id) => id,
            None => {
                log::info!("Journal {:?} has no recorded runs", journal.path());
                return Ok(RecoveryReport::default());
            }
        },
    };

    let pending = journal.pending_restores(&run_id)?;
    log::info!("Run {}: {} object(s) pending restore", run_id, pending.len());

    let mut report = RecoveryReport {
        run_id: Some(run_id.clone()),
        ..Default::default()
    };

    for entry in pending {
        let name = entry.object_name.clone().unwrap_or_default();
        let Some(sql) = entry.sql.as_deref() else {
            log::warn!("No recreate statement journaled for {}, skipping", name);
            report.failed.push(name);
            continue;
        };

        match conn.execute(sql).await {
            Ok(()) => {
                log::info!("Recovered {}", name);
                let mut done = JournalEntry::new(
                    &run_id,
                    &entry.table,
                    &entry.column,
                    JournalEvent::Compensated,
                )
                .with_sql(sql);
                done.object_kind = entry.object_kind;
                done.object_name = entry.object_name.clone();
                if let Err(e) = journal.record(&done) {
                    log::warn!("Could not journal recovery of {}: {}", name, e);
                }
                report.restored.push(name);
            }
            Err(e) => {
                log::error!("Recovering {} failed: {}", name, e);
                report.failed.push(name);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connectors::memory::MemoryConnector;
    use tempfile::tempdir;

    fn table() -> TableName {
        TableName::new("dbo", "worker_requests")
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ModificationPhase::Mutating.to_string(), "Mutating");
        assert_eq!(ModificationPhase::Compensated.to_string(), "Compensated");
    }

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: ModificationOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ModificationOptions::default());
        assert!(options.compensate_on_failure);
        assert!(options.require_existing_column);

        let options: ModificationOptions =
            serde_json::from_str(r#"{"primary_key_detection":"name_prefix"}"#).unwrap();
        assert_eq!(options.primary_key_detection, PrimaryKeyDetection::NamePrefix);
    }

    #[test]
    fn test_summary_text_of_failed_run() {
        let report = ModificationReport {
            run_id: "run-9".to_string(),
            table: "dbo.worker_requests".to_string(),
            column: "notes".to_string(),
            mutation: "ALTER COLUMN nvarchar(500) NOT NULL".to_string(),
            original_definition: None,
            summary: DependencySummary::default(),
            dropped: vec!["IX_notes".to_string(), "CK_notes".to_string()],
            recreated: vec!["IX_notes".to_string()],
            skipped_primary_keys: Vec::new(),
            superseded_defaults: Vec::new(),
            phase: ModificationPhase::Mutating,
            duration_ms: 12,
        };

        let text = report.summary_text();
        assert!(text.contains("Dropped:     IX_notes, CK_notes"));
        assert!(text.contains("Recreated:   IX_notes"));
        assert!(text.ends_with("Phase:       Mutating in 12 ms"));
    }

    #[tokio::test]
    async fn test_alter_column_statements() {
        let conn = MemoryConnector::new();
        let mutation = AlterColumn::new("nvarchar(500)", false).with_default("(N'')");
        mutation.apply(&conn, &table(), "notes").await.unwrap();

        assert_eq!(
            conn.executed(),
            vec![
                "ALTER TABLE [dbo].[worker_requests] ALTER COLUMN [notes] nvarchar(500) NOT NULL"
                    .to_string(),
                "ALTER TABLE [dbo].[worker_requests] ADD CONSTRAINT [DF_worker_requests_notes] DEFAULT (N'') FOR [notes]"
                    .to_string(),
            ]
        );
        assert!(mutation.replaces_default());
        assert!(!AlterColumn::new("int", true).replaces_default());
    }

    #[test]
    fn test_alter_column_validation() {
        assert!(AlterColumn::new("decimal(18, 2)", true).validate().is_ok());
        assert!(matches!(
            AlterColumn::new("int; DROP TABLE x", true).validate(),
            Err(GuardError::Validation(_))
        ));
        assert!(matches!(
            AlterColumn::new("int", true).with_default("  ").validate(),
            Err(GuardError::Mutation(_))
        ));
    }

    #[tokio::test]
    async fn test_sql_batch_runs_in_order_and_stops_on_error() {
        let conn = MemoryConnector::new().fail_on("second");
        let batch = SqlBatch(vec![
            "UPDATE first".to_string(),
            "UPDATE second".to_string(),
            "UPDATE third".to_string(),
        ]);
        assert!(batch.apply(&conn, &table(), "notes").await.is_err());
        assert_eq!(conn.executed(), vec!["UPDATE first".to_string()]);
        assert_eq!(batch.describe(), "batch of 3 statement(s)");
    }

    #[tokio::test]
    async fn test_recover_replays_pending_restores() {
        let dir = tempdir().unwrap();
        let journal = CompensationJournal::new(dir.path().join("journal.jsonl"));
        let t = "dbo.worker_requests";

        journal
            .record(&JournalEntry::new("run-1", t, "notes", JournalEvent::Started))
            .unwrap();
        journal
            .record(
                &JournalEntry::new("run-1", t, "notes", JournalEvent::Dropped)
                    .with_object(DependencyKind::Index, "IX_notes")
                    .with_sql("CREATE NONCLUSTERED INDEX [IX_notes] ON [dbo].[worker_requests] ([notes] ASC)"),
            )
            .unwrap();
        journal
            .record(
                &JournalEntry::new("run-1", t, "notes", JournalEvent::Dropped)
                    .with_object(DependencyKind::CheckConstraint, "CK_notes")
                    .with_sql("ALTER TABLE [dbo].[worker_requests] ADD CONSTRAINT [CK_notes] CHECK (len([notes])>(0))"),
            )
            .unwrap();

        let conn = MemoryConnector::new().fail_on("CK_notes");
        let report = recover(&conn, &journal, None).await.unwrap();
        assert_eq!(report.run_id.as_deref(), Some("run-1"));
        assert_eq!(report.restored, vec!["IX_notes"]);
        assert_eq!(report.failed, vec!["CK_notes"]);

        // The index is no longer pending; the check still is.
        let pending = journal.pending_restores("run-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].object_name.as_deref(), Some("CK_notes"));

        conn.clear_failures();
        let report = recover(&conn, &journal, Some("run-1")).await.unwrap();
        assert_eq!(report.restored, vec!["CK_notes"]);
        assert!(journal.pending_restores("run-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_empty_journal() {
        let dir = tempdir().unwrap();
        let journal = CompensationJournal::new(dir.path().join("journal.jsonl"));
        let conn = MemoryConnector::new();
        let report = recover(&conn, &journal, None).await.unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert!(conn.executed().is_empty());
    }
}
