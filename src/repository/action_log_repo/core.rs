use crate::db::SharedConnection;
use crate::domain::action_log::ActionLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{named_params, Connection};
use std::sync::MutexGuard;

/// action_ts 存储格式（微秒，文本序即时间序）
pub(super) const ACTION_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// ==========================================
// ActionLogRepository - 操作日志仓储（只追加）
// ==========================================
pub struct ActionLogRepository {
    conn: SharedConnection,
}

impl ActionLogRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 独立写入一条日志（不随业务事务提交）
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, log)
    }

    /// 在调用方事务内追加日志，与业务写入同提交/同回滚
    pub fn insert_with(conn: &Connection, log: &ActionLog) -> RepositoryResult<String> {
        conn.execute(
            "INSERT INTO action_log (
                 action_id, action_type, action_ts, actor,
                 entity_type, entity_id, payload_json, detail
             ) VALUES (
                 :action_id, :action_type, :action_ts, :actor,
                 :entity_type, :entity_id, :payload_json, :detail
             )",
            named_params! {
                ":action_id": log.action_id,
                ":action_type": log.action_type,
                ":action_ts": log.action_ts.format(ACTION_TS_FORMAT).to_string(),
                ":actor": log.actor,
                ":entity_type": log.entity_type,
                ":entity_id": log.entity_id,
                ":payload_json": log.payload_json.as_ref().map(|v| v.to_string()),
                ":detail": log.detail,
            },
        )?;
        Ok(log.action_id.clone())
    }
}
