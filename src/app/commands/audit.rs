use crate::app::state::AppState;
use crate::engine::EngineError;
use serde::{Deserialize, Serialize};

use super::common::{run_blocking, to_json};

// ==========================================
// 盘点命令
// ==========================================

/// 登记实盘数量（账面数量被覆盖为实盘数量）
pub async fn record_stock_audit(
    state: &AppState,
    material_id: String,
    actual_quantity: i64,
    audited_by: String,
) -> Result<String, String> {
    let engine = state.audit_engine.clone();
    let outcome = run_blocking("cmd.record_stock_audit", move || {
        engine.record_audit(&material_id, actual_quantity, &audited_by)
    })
    .await?;
    to_json(&outcome)
}

/// 盘点记录（material_id 为空时返回全部）
pub async fn list_stock_audits(
    state: &AppState,
    material_id: Option<String>,
) -> Result<String, String> {
    let engine = state.audit_engine.clone();
    let audits = run_blocking("cmd.list_stock_audits", move || match material_id {
        Some(id) if !id.trim().is_empty() => engine.audits_for(&id),
        _ => engine.list_audits(),
    })
    .await?;
    to_json(&audits)
}

// ==========================================
// 操作日志
// ==========================================

/// 操作日志查询条件（优先级: entity > actor > action_type > 最近）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionLogQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub action_type: Option<String>,
    pub limit: i32,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// 查询操作日志（时间倒序）
pub async fn list_action_logs(state: &AppState, query: ActionLogQuery) -> Result<String, String> {
    let repo = state.action_log_repo.clone();
    let limit = query.limit.max(1);
    let logs = run_blocking("cmd.list_action_logs", move || {
        let logs = match (
            non_blank(query.entity_type),
            non_blank(query.entity_id),
            non_blank(query.actor),
            non_blank(query.action_type),
        ) {
            (Some(t), Some(id), _, _) => repo.find_by_entity(&t, &id)?,
            (_, _, Some(actor), _) => repo.find_by_actor(&actor, limit)?,
            (_, _, None, Some(action_type)) => repo.find_by_action_type(&action_type, limit)?,
            _ => repo.find_recent(limit)?,
        };
        Ok::<_, EngineError>(logs)
    })
    .await?;
    to_json(&logs)
}

/// 单条操作日志
pub async fn get_action_log(state: &AppState, action_id: String) -> Result<String, String> {
    let repo = state.action_log_repo.clone();
    let log = run_blocking("cmd.get_action_log", move || {
        repo.find_by_id(&action_id)?
            .ok_or_else(|| EngineError::not_found("ActionLog", &action_id))
    })
    .await?;
    to_json(&log)
}

/// 按操作类型统计日志条数
pub async fn count_action_logs(state: &AppState, action_type: String) -> Result<String, String> {
    let repo = state.action_log_repo.clone();
    let count = run_blocking("cmd.count_action_logs", move || {
        let count = repo.count_by_action_type(&action_type)?;
        Ok::<_, EngineError>(serde_json::json!({ "action_type": action_type, "count": count }))
    })
    .await?;
    to_json(&count)
}
