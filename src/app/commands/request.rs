use crate::app::state::AppState;
use crate::domain::{Decision, NewMaterial, RequestStatus, Requester};

use super::common::{invalid_input, run_blocking, to_json};

// ==========================================
// 申领命令
// ==========================================

/// 提交申领
pub async fn submit_request(
    state: &AppState,
    material_id: String,
    project_id: String,
    quantity: i64,
    user_id: String,
    username: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let request = run_blocking("cmd.submit_request", move || {
        coordinator.submit_request(
            &material_id,
            &project_id,
            quantity,
            &Requester::new(&user_id, &username),
        )
    })
    .await?;
    to_json(&request)
}

/// 审批申领（decision = "approve" / "reject"）
pub async fn respond_to_request(
    state: &AppState,
    request_id: String,
    decision: String,
    message: Option<String>,
    operator: String,
) -> Result<String, String> {
    let decision = Decision::parse(&decision)
        .ok_or_else(|| invalid_input(format!("无效的审批决定: {}", decision)))?;
    let coordinator = state.coordinator.clone();
    let outcome = run_blocking("cmd.respond_to_request", move || {
        coordinator.respond(&request_id, decision, message.as_deref(), &operator)
    })
    .await?;
    to_json(&outcome)
}

pub async fn get_request(state: &AppState, request_id: String) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let request = run_blocking("cmd.get_request", move || coordinator.get_request(&request_id)).await?;
    to_json(&request)
}

/// 申领列表（status 为空时返回全部）
pub async fn list_requests(state: &AppState, status: Option<String>) -> Result<String, String> {
    let status = match status.filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(
            RequestStatus::parse(&raw)
                .ok_or_else(|| invalid_input(format!("无效的申领状态: {}", raw)))?,
        ),
        None => None,
    };
    let coordinator = state.coordinator.clone();
    let requests = run_blocking("cmd.list_requests", move || {
        let all = coordinator.list_requests()?;
        Ok(all
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect::<Vec<_>>())
    })
    .await?;
    to_json(&requests)
}

// ==========================================
// 物资命令
// ==========================================

pub async fn create_material(
    state: &AppState,
    new_material: NewMaterial,
    operator: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let material = run_blocking("cmd.create_material", move || {
        coordinator.create_material(new_material, &operator)
    })
    .await?;
    to_json(&material)
}

pub async fn restock_material(
    state: &AppState,
    material_id: String,
    delta: i64,
    operator: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let outcome = run_blocking("cmd.restock_material", move || {
        coordinator.restock_material(&material_id, delta, &operator)
    })
    .await?;
    to_json(&outcome)
}

pub async fn update_material_price(
    state: &AppState,
    material_id: String,
    price: f64,
    operator: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let material = run_blocking("cmd.update_material_price", move || {
        coordinator.update_material_price(&material_id, price, &operator)
    })
    .await?;
    to_json(&material)
}

pub async fn list_materials(state: &AppState) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let materials = run_blocking("cmd.list_materials", move || coordinator.list_materials()).await?;
    to_json(&materials)
}

// ==========================================
// 项目命令
// ==========================================

pub async fn create_project(
    state: &AppState,
    name: String,
    budget: f64,
    operator: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let project = run_blocking("cmd.create_project", move || {
        coordinator.create_project(&name, budget, &operator)
    })
    .await?;
    to_json(&project)
}

pub async fn top_up_budget(
    state: &AppState,
    project_id: String,
    amount: f64,
    operator: String,
) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let outcome = run_blocking("cmd.top_up_budget", move || {
        coordinator.top_up_budget(&project_id, amount, &operator)
    })
    .await?;
    to_json(&outcome)
}

pub async fn list_projects(state: &AppState) -> Result<String, String> {
    let coordinator = state.coordinator.clone();
    let projects = run_blocking("cmd.list_projects", move || coordinator.list_projects()).await?;
    to_json(&projects)
}
