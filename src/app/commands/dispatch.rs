use crate::app::state::AppState;
use crate::domain::{AssignmentPolicyKind, DispatchStatus, NewManualDispatch};

use super::common::{invalid_input, parse_time_opt, run_blocking, to_json};

// ==========================================
// 派车命令
// ==========================================

/// 全量对账: 为所有缺少派车单的已批准申领补建派车单
pub async fn reconcile_dispatches(state: &AppState) -> Result<String, String> {
    let scheduler = state.scheduler.clone();
    let report = run_blocking("cmd.reconcile_dispatches", move || scheduler.reconcile_all()).await?;
    to_json(&report)
}

/// 手工派车（eta 可为空；RFC3339 或 YYYY-MM-DD）
#[allow(clippy::too_many_arguments)]
pub async fn create_manual_dispatch(
    state: &AppState,
    material_id: String,
    quantity: i64,
    driver_id: String,
    to_site: String,
    from_site: Option<String>,
    vehicle_number: Option<String>,
    eta: Option<String>,
    operator: String,
) -> Result<String, String> {
    let new_dispatch = NewManualDispatch {
        material_id,
        quantity,
        driver_id,
        vehicle_number: vehicle_number.filter(|v| !v.trim().is_empty()),
        from_site: from_site.filter(|v| !v.trim().is_empty()),
        to_site,
        eta: parse_time_opt(eta)?,
    };
    let scheduler = state.scheduler.clone();
    let outcome = run_blocking("cmd.create_manual_dispatch", move || {
        scheduler.create_dispatch(new_dispatch, &operator)
    })
    .await?;
    to_json(&outcome)
}

pub async fn update_dispatch_status(
    state: &AppState,
    dispatch_id: String,
    status: String,
    operator: String,
) -> Result<String, String> {
    let status = DispatchStatus::parse(&status)
        .ok_or_else(|| invalid_input(format!("无效的派车状态: {}", status)))?;
    let scheduler = state.scheduler.clone();
    let outcome = run_blocking("cmd.update_dispatch_status", move || {
        scheduler.update_status(&dispatch_id, status, &operator)
    })
    .await?;
    to_json(&outcome)
}

pub async fn list_dispatches(state: &AppState, status: Option<String>) -> Result<String, String> {
    let status = match status.filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(
            DispatchStatus::parse(&raw)
                .ok_or_else(|| invalid_input(format!("无效的派车状态: {}", raw)))?,
        ),
        None => None,
    };
    let scheduler = state.scheduler.clone();
    let dispatches =
        run_blocking("cmd.list_dispatches", move || scheduler.list_dispatches(status)).await?;
    to_json(&dispatches)
}

// ==========================================
// 司机命令
// ==========================================

pub async fn register_driver(
    state: &AppState,
    name: String,
    vehicle_number: String,
    operator: String,
) -> Result<String, String> {
    let scheduler = state.scheduler.clone();
    let driver = run_blocking("cmd.register_driver", move || {
        scheduler.register_driver(&name, &vehicle_number, &operator)
    })
    .await?;
    to_json(&driver)
}

pub async fn set_driver_active(
    state: &AppState,
    driver_id: String,
    active: bool,
    operator: String,
) -> Result<String, String> {
    let scheduler = state.scheduler.clone();
    let driver = run_blocking("cmd.set_driver_active", move || {
        scheduler.set_driver_active(&driver_id, active, &operator)
    })
    .await?;
    to_json(&driver)
}

pub async fn list_drivers(state: &AppState) -> Result<String, String> {
    let scheduler = state.scheduler.clone();
    let drivers = run_blocking("cmd.list_drivers", move || scheduler.list_drivers()).await?;
    to_json(&drivers)
}

/// 切换司机分配策略（同时写入配置）
pub async fn set_assignment_policy(state: &AppState, policy: String) -> Result<String, String> {
    let kind = AssignmentPolicyKind::parse(&policy)
        .ok_or_else(|| invalid_input(format!("未知的分配策略: {}", policy)))?;
    let scheduler = state.scheduler.clone();
    run_blocking("cmd.set_assignment_policy", move || scheduler.set_policy(kind)).await?;
    to_json(&serde_json::json!({ "policy": kind.as_str() }))
}
