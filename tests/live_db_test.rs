//! Integration tests against a live SQL Server.
//!
//! Prerequisites:
//!   - SQL Server on localhost:1433 with sa/YourPassword123 and an empty database ColguardTest
//!   - Or set COLGUARD_HOST / COLGUARD_PORT / COLGUARD_USER / COLGUARD_PASSWORD / COLGUARD_DATABASE
//!
//! Run with `cargo test --test live_db_test -- --ignored`.

use colguard_lib::db::connectors::sqlserver::SqlServerConnector;
use colguard_lib::db::plan::{build_plan, PrimaryKeyDetection};
use colguard_lib::{
    safe_column_modification, scan_dependencies, AlterColumn, ConnectionConfig,
    DatabaseConnector, ModificationOptions, TableName,
};

// ─── helpers ───────────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn sqlserver_config() -> ConnectionConfig {
    ConnectionConfig {
        host: Some(env_or("COLGUARD_HOST", "localhost")),
        port: Some(env_or("COLGUARD_PORT", "1433").parse().unwrap()),
        database: Some(env_or("COLGUARD_DATABASE", "ColguardTest")),
        username: Some(env_or("COLGUARD_USER", "sa")),
        password: Some(env_or("COLGUARD_PASSWORD", "YourPassword123")),
        ..Default::default()
    }
}

async fn connected() -> SqlServerConnector {
    let mut conn = SqlServerConnector::new(sqlserver_config());
    conn.connect().await.expect("SQL Server connect failed");
    conn
}

/// Create a parent/child pair with one dependency of every kind on
/// `child.parent_id`, returning the child table name.
async fn create_fixture(conn: &SqlServerConnector, suffix: &str) -> (TableName, TableName) {
    let parent = TableName::new("dbo", format!("cg_parent_{}", suffix));
    let child = TableName::new("dbo", format!("cg_child_{}", suffix));

    let statements = [
        format!(
            "CREATE TABLE [dbo].[{p}] (id INT NOT NULL CONSTRAINT [PK_{p}] PRIMARY KEY)",
            p = parent.name
        ),
        format!(
            "CREATE TABLE [dbo].[{c}] (
                id INT NOT NULL CONSTRAINT [PK_{c}] PRIMARY KEY,
                parent_id INT NOT NULL CONSTRAINT [DF_{c}_parent] DEFAULT ((1)),
                slot INT NOT NULL,
                note NVARCHAR(50) NULL,
                CONSTRAINT [CK_{c}_parent] CHECK ([parent_id] > 0),
                CONSTRAINT [UQ_{c}_parent_slot] UNIQUE NONCLUSTERED (parent_id, slot),
                CONSTRAINT [FK_{c}_parent] FOREIGN KEY (parent_id)
                    REFERENCES [dbo].[{p}] (id) ON DELETE CASCADE
            )",
            c = child.name,
            p = parent.name
        ),
        format!(
            "CREATE NONCLUSTERED INDEX [IX_{c}_parent] ON [dbo].[{c}] (parent_id ASC, slot DESC) INCLUDE (note)",
            c = child.name
        ),
    ];
    for sql in &statements {
        conn.execute(sql).await.expect("fixture setup failed");
    }
    (parent, child)
}

async fn drop_fixture(conn: &SqlServerConnector, parent: &TableName, child: &TableName) {
    let _ = conn
        .execute(&format!("DROP TABLE IF EXISTS [dbo].[{}]", child.name))
        .await;
    let _ = conn
        .execute(&format!("DROP TABLE IF EXISTS [dbo].[{}]", parent.name))
        .await;
}

fn suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONNECTION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_connect_disconnect() {
    let mut conn = SqlServerConnector::new(sqlserver_config());
    assert!(!conn.is_connected().await);

    conn.connect().await.expect("SQL Server connect failed");
    assert!(conn.is_connected().await);

    conn.disconnect().await.expect("SQL Server disconnect failed");
    assert!(!conn.is_connected().await);
}

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_connect_wrong_password() {
    let mut cfg = sqlserver_config();
    cfg.password = Some("WrongPassword999".to_string());
    let mut conn = SqlServerConnector::new(cfg);
    assert!(conn.connect().await.is_err(), "Should fail with wrong credentials");
}

// ═══════════════════════════════════════════════════════════════════════════
//  SCANNING
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_scan_every_category() {
    let conn = connected().await;
    let (parent, child) = create_fixture(&conn, &suffix()).await;

    let deps = scan_dependencies(&conn, &child, "parent_id").await;
    drop_fixture(&conn, &parent, &child).await;
    let deps = deps.expect("scan failed");

    // IX rows: parent_id, slot, note (included)
    assert_eq!(deps.indexes.len(), 3);
    assert_eq!(deps.foreign_keys.len(), 1);
    assert_eq!(deps.check_constraints.len(), 1);
    assert_eq!(deps.default_constraints.len(), 1);
    assert_eq!(deps.unique_constraints.len(), 2);
    assert_eq!(deps.foreign_keys[0].delete_action, 1);
}

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_scan_unknown_column() {
    let conn = connected().await;
    let deps = scan_dependencies(&conn, &TableName::new("dbo", "cg_does_not_exist"), "nope")
        .await
        .expect("scan failed");
    assert!(deps.is_empty());
    assert!(conn
        .column_definition(&TableName::new("dbo", "cg_does_not_exist"), "nope")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_primary_key_flag() {
    let conn = connected().await;
    let (parent, child) = create_fixture(&conn, &suffix()).await;

    let deps = scan_dependencies(&conn, &child, "id").await;
    drop_fixture(&conn, &parent, &child).await;
    let deps = deps.expect("scan failed");

    let plan = build_plan(&child, &deps, PrimaryKeyDetection::CatalogFlag);
    assert!(deps.indexes.iter().any(|i| i.is_primary_key));
    assert_eq!(plan.skipped_primary_keys, vec![format!("PK_{}", child.name)]);
    assert!(plan.drops.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
//  MODIFICATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_modify_preserves_dependencies() {
    let conn = connected().await;
    let (parent, child) = create_fixture(&conn, &suffix()).await;

    let before = scan_dependencies(&conn, &child, "parent_id").await.unwrap();
    let result = safe_column_modification(
        &conn,
        &child,
        "parent_id",
        &AlterColumn::new("int", false),
        &ModificationOptions::default(),
        None,
    )
    .await;
    let after = scan_dependencies(&conn, &child, "parent_id").await;
    drop_fixture(&conn, &parent, &child).await;

    let report = result.expect("modification failed");
    assert_eq!(report.dropped, report.recreated);
    assert_eq!(after.expect("rescan failed"), before);
}

#[tokio::test]
#[ignore = "requires a live SQL Server"]
async fn sqlserver_modify_widens_column() {
    let conn = connected().await;
    let (parent, child) = create_fixture(&conn, &suffix()).await;

    let result = safe_column_modification(
        &conn,
        &child,
        "note",
        &AlterColumn::new("nvarchar(200)", true),
        &ModificationOptions::default(),
        None,
    )
    .await;
    let definition = conn.column_definition(&child, "note").await;
    drop_fixture(&conn, &parent, &child).await;

    let report = result.expect("modification failed");
    assert_eq!(
        report.original_definition.unwrap().column_spec(),
        "nvarchar(50) NULL"
    );
    assert_eq!(
        definition.unwrap().unwrap().column_spec(),
        "nvarchar(200) NULL"
    );
}
