// ==========================================
// 工地物资申领履约系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表幂等（CREATE TABLE IF NOT EXISTS），CHECK 约束兜底业务红线
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 共享连接类型（所有仓储共用同一连接 = 单写者串行化点）
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 打开内存数据库并建表（测试 / 演示用）
pub fn open_in_memory() -> rusqlite::Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 打开数据库文件、建表并包装为共享连接
pub fn open_shared(db_path: &str) -> rusqlite::Result<SharedConnection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 初始化 schema（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS materials (
            material_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            unit_type TEXT,
            price REAL NOT NULL CHECK (price >= 0),
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            supplier TEXT,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            budget REAL NOT NULL CHECK (budget >= 0),
            spent REAL NOT NULL DEFAULT 0 CHECK (spent >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS material_requests (
            request_id TEXT PRIMARY KEY,
            material_id TEXT NOT NULL REFERENCES materials(material_id),
            material_name TEXT,
            quantity_requested INTEGER NOT NULL CHECK (quantity_requested > 0),
            total_cost REAL NOT NULL,
            user_id TEXT,
            username TEXT,
            project_id TEXT NOT NULL REFERENCES projects(project_id),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected')),
            requested_at TEXT NOT NULL,
            responded_at TEXT,
            response_message TEXT,
            delivery_assigned INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_requests_status
          ON material_requests(status, requested_at);
        CREATE INDEX IF NOT EXISTS idx_requests_project
          ON material_requests(project_id, status);

        CREATE TABLE IF NOT EXISTS drivers (
            driver_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            vehicle_number TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dispatches (
            dispatch_id TEXT PRIMARY KEY,
            request_id TEXT UNIQUE REFERENCES material_requests(request_id),
            material_id TEXT NOT NULL REFERENCES materials(material_id),
            material_name TEXT,
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            from_site TEXT,
            to_site TEXT,
            driver_id TEXT NOT NULL,
            driver_name TEXT,
            vehicle_number TEXT,
            status TEXT NOT NULL DEFAULT 'in-transit'
                CHECK (status IN ('in-transit', 'delivered', 'delayed')),
            dispatch_time TEXT NOT NULL,
            eta TEXT NOT NULL,
            delivery_time TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_dispatches_driver
          ON dispatches(driver_id, status);

        CREATE TABLE IF NOT EXISTS stock_audits (
            audit_id TEXT PRIMARY KEY,
            material_id TEXT NOT NULL REFERENCES materials(material_id),
            material_name TEXT,
            recorded_quantity INTEGER NOT NULL,
            actual_quantity INTEGER NOT NULL CHECK (actual_quantity >= 0),
            audited_at TEXT NOT NULL,
            audited_by TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audits_material
          ON stock_audits(material_id, audited_at);

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            entity_type TEXT,
            entity_id TEXT,
            payload_json TEXT,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_action_log_entity
          ON action_log(entity_type, entity_id, action_ts);
        CREATE INDEX IF NOT EXISTS idx_action_log_ts
          ON action_log(action_ts);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
