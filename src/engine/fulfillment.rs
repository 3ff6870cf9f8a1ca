// ==========================================
// 工地物资申领履约系统 - 申领履约引擎
// ==========================================
// 职责: 申领提交 / 审批（批准或驳回） / 物资与项目维护
// 红线:
// - 库存只在批准时扣减一次（派车不再扣减）
// - 批准 = 扣库存 + 记支出 + 写状态 + 记日志，同一事务内完成
// - 业务规则失败时三条记录保持原样
// 并发: 所有写入经 run_in_transaction（共享连接互斥 + IMMEDIATE 事务）串行化
// ==========================================

use crate::db::SharedConnection;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::material::{Material, NewMaterial};
use crate::domain::project::Project;
use crate::domain::request::{MaterialRequest, Requester};
use crate::domain::types::{Decision, RequestStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::OptionalPublisher;
use crate::repository::{
    run_in_transaction, ActionLogRepository, MaterialRepository, ProjectRepository,
    RequestRepository,
};
use crate::store::path::{Collection, LedgerPath};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

// ==========================================
// 结果类型
// ==========================================

/// 批准结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub request: MaterialRequest,
    pub material: Material,
    pub project: Project,
    pub message: String,
}

/// 驳回结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionOutcome {
    pub request: MaterialRequest,
    pub message: String,
}

/// 审批结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ResponseOutcome {
    Approved(ApprovalOutcome),
    Rejected(RejectionOutcome),
}

impl ResponseOutcome {
    pub fn request(&self) -> &MaterialRequest {
        match self {
            ResponseOutcome::Approved(o) => &o.request,
            ResponseOutcome::Rejected(o) => &o.request,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ResponseOutcome::Approved(o) => &o.message,
            ResponseOutcome::Rejected(o) => &o.message,
        }
    }
}

/// 补货结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockOutcome {
    pub material: Material,
    pub previous_quantity: i64,
    pub message: String,
}

/// 追加预算结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetTopUpOutcome {
    pub project: Project,
    pub previous_budget: f64,
    pub message: String,
}

// ==========================================
// FulfillmentCoordinator - 申领履约协调器
// ==========================================
pub struct FulfillmentCoordinator {
    conn: SharedConnection,
    request_repo: Arc<RequestRepository>,
    material_repo: Arc<MaterialRepository>,
    project_repo: Arc<ProjectRepository>,
    publisher: OptionalPublisher,
}

impl FulfillmentCoordinator {
    pub fn new(conn: SharedConnection, publisher: OptionalPublisher) -> Self {
        Self {
            request_repo: Arc::new(RequestRepository::new(conn.clone())),
            material_repo: Arc::new(MaterialRepository::new(conn.clone())),
            project_repo: Arc::new(ProjectRepository::new(conn.clone())),
            conn,
            publisher,
        }
    }

    // ==========================================
    // 申领提交
    // ==========================================

    /// 提交申领（状态 pending，总价 = 数量 × 当前单价）
    #[instrument(skip(self, requester), fields(username = %requester.username))]
    pub fn submit_request(
        &self,
        material_id: &str,
        project_id: &str,
        quantity: i64,
        requester: &Requester,
    ) -> EngineResult<MaterialRequest> {
        if quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "申领数量必须大于0: quantity={}",
                quantity
            )));
        }
        require_field("material_id", material_id)?;
        require_field("project_id", project_id)?;
        require_field("username", &requester.username)?;

        let request = run_in_transaction(&self.conn, |tx| -> EngineResult<MaterialRequest> {
            let material = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;
            ProjectRepository::find_by_id_with(tx, project_id)?
                .ok_or_else(|| EngineError::not_found("Project", project_id))?;

            let request = MaterialRequest {
                request_id: Uuid::new_v4().to_string(),
                material_id: material.material_id.clone(),
                material_name: material.name.clone(),
                quantity_requested: quantity,
                total_cost: material.cost_of(quantity),
                user_id: requester.user_id.clone(),
                username: requester.username.clone(),
                project_id: project_id.to_string(),
                status: RequestStatus::Pending,
                requested_at: Utc::now(),
                responded_at: None,
                response_message: None,
                delivery_assigned: false,
            };
            RequestRepository::insert_with(tx, &request)?;

            let log = ActionLog::new(ActionType::SubmitRequest, &requester.username)
                .with_entity(Collection::MaterialRequests.as_str(), &request.request_id)
                .with_payload(json!({
                    "material_id": request.material_id,
                    "project_id": request.project_id,
                    "quantity": quantity,
                    "total_cost": request.total_cost,
                }))
                .with_detail(format!(
                    "申领 {} x{}，预计费用 {:.2}",
                    request.material_name, quantity, request.total_cost
                ));
            ActionLogRepository::insert_with(tx, &log)?;
            Ok(request)
        })?;

        tracing::info!(
            request_id = %request.request_id,
            material_id = %request.material_id,
            quantity = request.quantity_requested,
            total_cost = request.total_cost,
            "申领已提交"
        );
        self.publisher
            .publish_entity(LedgerPath::request(&request.request_id), &request);
        Ok(request)
    }

    // ==========================================
    // 审批
    // ==========================================

    /// 处理申领（批准或驳回）
    ///
    /// # 错误
    /// - `NotFound`: 申领不存在
    /// - `AlreadyResolved`: 申领不在 pending 状态
    /// - `InsufficientStock` / `BudgetExceeded`: 仅批准时，记录保持原样
    pub fn respond(
        &self,
        request_id: &str,
        decision: Decision,
        message: Option<&str>,
        actor: &str,
    ) -> EngineResult<ResponseOutcome> {
        match decision {
            Decision::Approve => self.approve(request_id, message, actor).map(ResponseOutcome::Approved),
            Decision::Reject => self.reject(request_id, message, actor).map(ResponseOutcome::Rejected),
        }
    }

    /// 批准申领
    #[instrument(skip(self, message))]
    pub fn approve(
        &self,
        request_id: &str,
        message: Option<&str>,
        actor: &str,
    ) -> EngineResult<ApprovalOutcome> {
        let result = run_in_transaction(&self.conn, |tx| -> EngineResult<ApprovalOutcome> {
            let request = load_pending(tx, request_id)?;
            let material = MaterialRepository::find_by_id_with(tx, &request.material_id)?
                .ok_or_else(|| EngineError::not_found("Material", &request.material_id))?;
            let project = ProjectRepository::find_by_id_with(tx, &request.project_id)?
                .ok_or_else(|| EngineError::not_found("Project", &request.project_id))?;

            let insufficient = || EngineError::InsufficientStock {
                material_id: material.material_id.clone(),
                available: material.quantity,
                requested: request.quantity_requested,
            };
            let over_budget = || EngineError::BudgetExceeded {
                project_id: project.project_id.clone(),
                available: project.remaining(),
                requested: request.total_cost,
            };

            if request.quantity_requested > material.quantity {
                return Err(insufficient());
            }
            if !project.can_afford(request.total_cost) {
                return Err(over_budget());
            }

            // 条件更新兜底：任一失败即整体回滚
            let now = Utc::now();
            if !MaterialRepository::adjust_quantity_with(
                tx,
                &material.material_id,
                -request.quantity_requested,
                &now,
            )? {
                return Err(insufficient());
            }
            if !ProjectRepository::add_spent_with(tx, &project.project_id, request.total_cost, &now)? {
                return Err(over_budget());
            }
            if !RequestRepository::resolve_with(tx, request_id, RequestStatus::Approved, &now, message)? {
                return Err(EngineError::AlreadyResolved {
                    request_id: request_id.to_string(),
                    status: request.status.to_string(),
                });
            }

            let request = reload_request(tx, request_id)?;
            let material = MaterialRepository::find_by_id_with(tx, &material.material_id)?
                .ok_or_else(|| EngineError::not_found("Material", &material.material_id))?;
            let project = ProjectRepository::find_by_id_with(tx, &project.project_id)?
                .ok_or_else(|| EngineError::not_found("Project", &project.project_id))?;

            let summary = format!(
                "已批准: {} 库存 -{}（剩余 {}），项目 {} 支出 +{:.2}（剩余预算 {:.2}）",
                material.name,
                request.quantity_requested,
                material.quantity,
                project.name,
                request.total_cost,
                project.remaining()
            );
            let log = ActionLog::new(ActionType::ApproveRequest, actor)
                .with_entity(Collection::MaterialRequests.as_str(), request_id)
                .with_payload(json!({
                    "material_id": material.material_id,
                    "quantity_deducted": request.quantity_requested,
                    "project_id": project.project_id,
                    "cost_charged": request.total_cost,
                }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            Ok(ApprovalOutcome {
                request,
                material,
                project,
                message: summary,
            })
        });

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "申领批准失败");
                return Err(e);
            }
        };

        tracing::info!(
            request_id = %request_id,
            material_id = %outcome.material.material_id,
            remaining_quantity = outcome.material.quantity,
            project_id = %outcome.project.project_id,
            spent = outcome.project.spent,
            "申领已批准"
        );
        self.publisher
            .publish_entity(LedgerPath::material(&outcome.material.material_id), &outcome.material);
        self.publisher
            .publish_entity(LedgerPath::project(&outcome.project.project_id), &outcome.project);
        self.publisher
            .publish_entity(LedgerPath::request(request_id), &outcome.request);
        Ok(outcome)
    }

    /// 驳回申领（不触及库存与预算）
    #[instrument(skip(self, message))]
    pub fn reject(
        &self,
        request_id: &str,
        message: Option<&str>,
        actor: &str,
    ) -> EngineResult<RejectionOutcome> {
        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<RejectionOutcome> {
            let request = load_pending(tx, request_id)?;
            let now = Utc::now();
            if !RequestRepository::resolve_with(tx, request_id, RequestStatus::Rejected, &now, message)? {
                return Err(EngineError::AlreadyResolved {
                    request_id: request_id.to_string(),
                    status: request.status.to_string(),
                });
            }
            let request = reload_request(tx, request_id)?;

            let summary = format!(
                "已驳回: {} x{}（费用 {:.2} 未计入）",
                request.material_name, request.quantity_requested, request.total_cost
            );
            let log = ActionLog::new(ActionType::RejectRequest, actor)
                .with_entity(Collection::MaterialRequests.as_str(), request_id)
                .with_detail(match message {
                    Some(m) => format!("{}，原因: {}", summary, m),
                    None => summary.clone(),
                });
            ActionLogRepository::insert_with(tx, &log)?;

            Ok(RejectionOutcome {
                request,
                message: summary,
            })
        })
        .map_err(|e| {
            tracing::warn!(request_id = %request_id, error = %e, "申领驳回失败");
            e
        })?;

        tracing::info!(request_id = %request_id, "申领已驳回");
        self.publisher
            .publish_entity(LedgerPath::request(request_id), &outcome.request);
        Ok(outcome)
    }

    // ==========================================
    // 物资维护
    // ==========================================

    /// 新建物资
    pub fn create_material(&self, new_material: NewMaterial, actor: &str) -> EngineResult<Material> {
        require_field("name", &new_material.name)?;
        if !new_material.price.is_finite() || new_material.price < 0.0 {
            return Err(EngineError::Validation(format!(
                "单价不能为负: price={}",
                new_material.price
            )));
        }
        if new_material.quantity < 0 {
            return Err(EngineError::Validation(format!(
                "初始库存不能为负: quantity={}",
                new_material.quantity
            )));
        }

        let material = new_material.into_material(Uuid::new_v4().to_string(), Utc::now());
        run_in_transaction(&self.conn, |tx| -> EngineResult<()> {
            MaterialRepository::insert_with(tx, &material)?;
            let log = ActionLog::new(ActionType::MaterialUpsert, actor)
                .with_entity(Collection::Materials.as_str(), &material.material_id)
                .with_detail(format!(
                    "新建物资 {}（{}），单价 {:.2}，库存 {}",
                    material.name, material.category, material.price, material.quantity
                ));
            ActionLogRepository::insert_with(tx, &log)?;
            Ok(())
        })?;

        tracing::info!(material_id = %material.material_id, name = %material.name, "物资已新建");
        self.publisher
            .publish_entity(LedgerPath::material(&material.material_id), &material);
        Ok(material)
    }

    /// 补货（delta > 0）
    pub fn restock_material(
        &self,
        material_id: &str,
        delta: i64,
        actor: &str,
    ) -> EngineResult<RestockOutcome> {
        if delta <= 0 {
            return Err(EngineError::Validation(format!(
                "补货数量必须大于0: delta={}",
                delta
            )));
        }

        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<RestockOutcome> {
            let before = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;
            if before.quantity.checked_add(delta).is_none() {
                return Err(EngineError::Validation(format!(
                    "补货后库存溢出: 当前={}, delta={}",
                    before.quantity, delta
                )));
            }
            if !MaterialRepository::adjust_quantity_with(tx, material_id, delta, &Utc::now())? {
                return Err(EngineError::StoreIo(format!(
                    "库存更新未生效: material_id={}",
                    material_id
                )));
            }
            let material = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;

            let summary = format!(
                "补货: {} 库存 +{}（{} -> {}）",
                material.name, delta, before.quantity, material.quantity
            );
            let log = ActionLog::new(ActionType::MaterialRestock, actor)
                .with_entity(Collection::Materials.as_str(), material_id)
                .with_payload(json!({ "delta": delta }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            Ok(RestockOutcome {
                material,
                previous_quantity: before.quantity,
                message: summary,
            })
        })?;

        tracing::info!(material_id = %material_id, delta, quantity = outcome.material.quantity, "物资已补货");
        self.publisher
            .publish_entity(LedgerPath::material(material_id), &outcome.material);
        Ok(outcome)
    }

    /// 调整单价（只影响之后提交的申领）
    pub fn update_material_price(
        &self,
        material_id: &str,
        price: f64,
        actor: &str,
    ) -> EngineResult<Material> {
        if !price.is_finite() || price < 0.0 {
            return Err(EngineError::Validation(format!("单价不能为负: price={}", price)));
        }

        let material = run_in_transaction(&self.conn, |tx| -> EngineResult<Material> {
            let before = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;
            MaterialRepository::update_price_with(tx, material_id, price, &Utc::now())?;
            let log = ActionLog::new(ActionType::MaterialUpsert, actor)
                .with_entity(Collection::Materials.as_str(), material_id)
                .with_detail(format!(
                    "调价: {} 单价 {:.2} -> {:.2}",
                    before.name, before.price, price
                ));
            ActionLogRepository::insert_with(tx, &log)?;
            MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))
        })?;

        tracing::info!(material_id = %material_id, price, "物资单价已调整");
        self.publisher
            .publish_entity(LedgerPath::material(material_id), &material);
        Ok(material)
    }

    // ==========================================
    // 项目维护
    // ==========================================

    /// 新建项目（spent 从 0 开始）
    pub fn create_project(&self, name: &str, budget: f64, actor: &str) -> EngineResult<Project> {
        require_field("name", name)?;
        if !budget.is_finite() || budget < 0.0 {
            return Err(EngineError::Validation(format!("预算不能为负: budget={}", budget)));
        }

        let now = Utc::now();
        let project = Project {
            project_id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            budget,
            spent: 0.0,
            created_at: now,
            updated_at: now,
        };
        run_in_transaction(&self.conn, |tx| -> EngineResult<()> {
            ProjectRepository::insert_with(tx, &project)?;
            let log = ActionLog::new(ActionType::ProjectUpsert, actor)
                .with_entity(Collection::Projects.as_str(), &project.project_id)
                .with_detail(format!("新建项目 {}，预算 {:.2}", project.name, budget));
            ActionLogRepository::insert_with(tx, &log)?;
            Ok(())
        })?;

        tracing::info!(project_id = %project.project_id, budget, "项目已新建");
        self.publisher
            .publish_entity(LedgerPath::project(&project.project_id), &project);
        Ok(project)
    }

    /// 追加预算（amount > 0）
    pub fn top_up_budget(
        &self,
        project_id: &str,
        amount: f64,
        actor: &str,
    ) -> EngineResult<BudgetTopUpOutcome> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::Validation(format!(
                "追加预算必须大于0: amount={}",
                amount
            )));
        }

        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<BudgetTopUpOutcome> {
            let before = ProjectRepository::find_by_id_with(tx, project_id)?
                .ok_or_else(|| EngineError::not_found("Project", project_id))?;
            ProjectRepository::add_budget_with(tx, project_id, amount, &Utc::now())?;
            let project = ProjectRepository::find_by_id_with(tx, project_id)?
                .ok_or_else(|| EngineError::not_found("Project", project_id))?;

            let summary = format!(
                "追加预算: {} +{:.2}（{:.2} -> {:.2}）",
                project.name, amount, before.budget, project.budget
            );
            let log = ActionLog::new(ActionType::BudgetTopUp, actor)
                .with_entity(Collection::Projects.as_str(), project_id)
                .with_payload(json!({ "amount": amount }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            Ok(BudgetTopUpOutcome {
                project,
                previous_budget: before.budget,
                message: summary,
            })
        })?;

        tracing::info!(project_id = %project_id, amount, budget = outcome.project.budget, "项目预算已追加");
        self.publisher
            .publish_entity(LedgerPath::project(project_id), &outcome.project);
        Ok(outcome)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_request(&self, request_id: &str) -> EngineResult<MaterialRequest> {
        self.request_repo
            .find_by_id(request_id)?
            .ok_or_else(|| EngineError::not_found("MaterialRequest", request_id))
    }

    /// 待审批申领（提交时间正序）
    pub fn list_pending(&self) -> EngineResult<Vec<MaterialRequest>> {
        Ok(self.request_repo.find_by_status(RequestStatus::Pending)?)
    }

    pub fn list_requests(&self) -> EngineResult<Vec<MaterialRequest>> {
        Ok(self.request_repo.list_all()?)
    }

    pub fn get_material(&self, material_id: &str) -> EngineResult<Material> {
        self.material_repo
            .find_by_id(material_id)?
            .ok_or_else(|| EngineError::not_found("Material", material_id))
    }

    pub fn list_materials(&self) -> EngineResult<Vec<Material>> {
        Ok(self.material_repo.list_all()?)
    }

    pub fn get_project(&self, project_id: &str) -> EngineResult<Project> {
        self.project_repo
            .find_by_id(project_id)?
            .ok_or_else(|| EngineError::not_found("Project", project_id))
    }

    pub fn list_projects(&self) -> EngineResult<Vec<Project>> {
        Ok(self.project_repo.list_all()?)
    }
}

// ==========================================
// 内部辅助
// ==========================================

fn require_field(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("缺少必填字段: {}", field)));
    }
    Ok(())
}

/// 读取申领并要求其处于 pending
fn load_pending(conn: &rusqlite::Connection, request_id: &str) -> EngineResult<MaterialRequest> {
    let request = RequestRepository::find_by_id_with(conn, request_id)?
        .ok_or_else(|| EngineError::not_found("MaterialRequest", request_id))?;
    if request.status != RequestStatus::Pending {
        return Err(EngineError::AlreadyResolved {
            request_id: request_id.to_string(),
            status: request.status.to_string(),
        });
    }
    Ok(request)
}

fn reload_request(conn: &rusqlite::Connection, request_id: &str) -> EngineResult<MaterialRequest> {
    RequestRepository::find_by_id_with(conn, request_id)?
        .ok_or_else(|| EngineError::not_found("MaterialRequest", request_id))
}

#[cfg(test)]
#[path = "fulfillment_tests.rs"]
mod tests;
