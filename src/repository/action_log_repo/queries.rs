use super::core::{ActionLogRepository, ACTION_TS_FORMAT};
use crate::domain::action_log::ActionLog;
use crate::repository::error::RepositoryResult;
use chrono::NaiveDateTime;
use rusqlite::{params, Result as SqliteResult, Row};

const SELECT_LOG: &str = r#"
    SELECT action_id, action_type, action_ts, actor,
           entity_type, entity_id, payload_json, detail
    FROM action_log
"#;

impl ActionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 action_id 查询单个日志
    pub fn find_by_id(&self, action_id: &str) -> RepositoryResult<Option<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE action_id = ?", SELECT_LOG))?;

        match stmt.query_row(params![action_id], map_row) {
            Ok(log) => Ok(Some(log)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询指定对象的操作日志（时间倒序）
    pub fn find_by_entity(&self, entity_type: &str, entity_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE entity_type = ? AND entity_id = ? ORDER BY action_ts DESC",
            SELECT_LOG
        ))?;

        let logs = stmt
            .query_map(params![entity_type, entity_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 查询指定操作人的操作日志
    pub fn find_by_actor(&self, actor: &str, limit: i32) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE actor = ? ORDER BY action_ts DESC LIMIT ?",
            SELECT_LOG
        ))?;

        let logs = stmt
            .query_map(params![actor, limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 查询指定类型的操作日志
    pub fn find_by_action_type(&self, action_type: &str, limit: i32) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE action_type = ? ORDER BY action_ts DESC LIMIT ?",
            SELECT_LOG
        ))?;

        let logs = stmt
            .query_map(params![action_type, limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 查询最近的操作日志
    pub fn find_recent(&self, limit: i32) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY action_ts DESC LIMIT ?", SELECT_LOG))?;

        let logs = stmt
            .query_map(params![limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 统计指定类型的日志数量
    pub fn count_by_action_type(&self, action_type: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE action_type = ?",
            params![action_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// 映射数据库行到 ActionLog
fn map_row(row: &Row) -> SqliteResult<ActionLog> {
    let action_ts_str: String = row.get(2)?;
    let action_ts = NaiveDateTime::parse_from_str(&action_ts_str, ACTION_TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&action_ts_str, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let payload_json_str: Option<String> = row.get(6)?;
    let payload_json = payload_json_str.and_then(|s| serde_json::from_str(&s).ok());

    Ok(ActionLog {
        action_id: row.get(0)?,
        action_type: row.get(1)?,
        action_ts,
        actor: row.get(3)?,
        entity_type: row.get(4)?,
        entity_id: row.get(5)?,
        payload_json,
        detail: row.get(7)?,
    })
}
