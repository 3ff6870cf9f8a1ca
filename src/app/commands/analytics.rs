use std::collections::HashMap;
use std::path::PathBuf;

use crate::app::state::AppState;
use crate::domain::RequestStatus;
use crate::engine::export;
use crate::engine::{AnalyticsSnapshot, EngineError, RequestFilter, SpendingAnalytics};

use super::common::{
    invalid_input, map_engine_error, map_export_error, parse_time_opt, run_blocking, to_json,
};

// ==========================================
// 分析 / 导出 / 配置命令
// ==========================================

/// 组装过滤条件（空字符串视为未指定）
pub fn build_filter(
    status: Option<String>,
    project_id: Option<String>,
    user: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<RequestFilter, String> {
    let mut filter = RequestFilter::all().between(parse_time_opt(from)?, parse_time_opt(to)?);
    if let Some(raw) = status.filter(|s| !s.trim().is_empty()) {
        let status = RequestStatus::parse(&raw)
            .ok_or_else(|| invalid_input(format!("无效的申领状态: {}", raw)))?;
        filter = filter.with_status(status);
    }
    if let Some(project_id) = project_id.filter(|s| !s.trim().is_empty()) {
        filter = filter.with_project(&project_id);
    }
    if let Some(user) = user.filter(|s| !s.trim().is_empty()) {
        filter = filter.with_user(&user);
    }
    Ok(filter)
}

/// 支出报告（汇总 + 分类 + 项目 + 损耗）
pub async fn get_spending_report(state: &AppState, filter: RequestFilter) -> Result<String, String> {
    let conn = state.conn.clone();
    let report = run_blocking("cmd.get_spending_report", move || {
        let snapshot = AnalyticsSnapshot::load(&conn)?;
        Ok::<_, EngineError>(SpendingAnalytics::report(&snapshot, &filter))
    })
    .await?;
    to_json(&report)
}

/// 低库存物资（threshold 为空时取配置 stock.low_threshold）
pub async fn get_low_stock_materials(
    state: &AppState,
    threshold: Option<i64>,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let config = state.config_manager.clone();
    let materials = run_blocking("cmd.get_low_stock_materials", move || {
        let threshold = match threshold {
            Some(t) => t,
            None => config.get_low_stock_threshold()?,
        };
        let materials = coordinator.list_materials()?;
        Ok::<_, EngineError>(SpendingAnalytics::low_stock(&materials, threshold))
    })
    .await?;
    to_json(&materials)
}

/// 导出申领明细
///
/// path 为空时返回 CSV 文本；否则写入文件并返回行数
pub async fn export_requests_csv(
    state: &AppState,
    filter: RequestFilter,
    path: Option<String>,
) -> Result<String, String> {
    let conn = state.conn.clone();
    let snapshot = run_blocking("cmd.export_requests_csv", move || {
        Ok::<_, EngineError>(AnalyticsSnapshot::load(&conn)?)
    })
    .await?;

    let project_names: HashMap<String, String> = snapshot
        .projects
        .iter()
        .map(|p| (p.project_id.clone(), p.name.clone()))
        .collect();
    let requests: Vec<_> = SpendingAnalytics::filter(&snapshot.requests, &filter)
        .into_iter()
        .cloned()
        .collect();

    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let rows = export::export_requests_to_path(&PathBuf::from(&path), &requests, &project_names)
                .map_err(map_export_error)?;
            to_json(&serde_json::json!({ "path": path, "rows": rows }))
        }
        None => export::requests_to_csv(&requests, &project_names).map_err(map_export_error),
    }
}

/// 导出损耗明细（path 语义同上）
pub async fn export_wastage_csv(
    state: &AppState,
    filter: RequestFilter,
    path: Option<String>,
) -> Result<String, String> {
    let conn = state.conn.clone();
    let wastage = run_blocking("cmd.export_wastage_csv", move || {
        let snapshot = AnalyticsSnapshot::load(&conn)?;
        Ok::<_, EngineError>(SpendingAnalytics::wastage(
            &snapshot.requests,
            &snapshot.audits,
            &filter,
        ))
    })
    .await?;

    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let rows = export::export_wastage_to_path(&PathBuf::from(&path), &wastage)
                .map_err(map_export_error)?;
            to_json(&serde_json::json!({ "path": path, "rows": rows }))
        }
        None => export::wastage_to_csv(&wastage).map_err(map_export_error),
    }
}

// ==========================================
// 配置
// ==========================================

pub fn get_config_snapshot(state: &AppState) -> Result<String, String> {
    let _perf = crate::perf::PerfGuard::new("cmd.get_config_snapshot");
    state
        .config_manager
        .get_config_snapshot()
        .map_err(|e| map_engine_error(e.into()))
}

pub fn set_config_value(state: &AppState, key: String, value: String) -> Result<String, String> {
    let _perf = crate::perf::PerfGuard::new("cmd.set_config_value");
    state
        .config_manager
        .set_config_value(&key, &value)
        .map_err(|e| map_engine_error(e.into()))?;
    to_json(&serde_json::json!({ "key": key, "value": value }))
}

// ==========================================
// 账本单条读取
// ==========================================

/// 按路径读取一条记录快照（如 "material_requests/r1"）；不存在时 value 为 null
pub async fn read_record(state: &AppState, path: String) -> Result<String, String> {
    let ledger_path = crate::store::LedgerPath::parse(&path)
        .ok_or_else(|| invalid_input(format!("无效的记录路径: {}", path)))?;
    let store = state.store.clone();
    let snapshot = run_blocking("cmd.read_record", move || {
        Ok::<_, EngineError>(store.read_once(&ledger_path)?)
    })
    .await?;
    to_json(&snapshot)
}
