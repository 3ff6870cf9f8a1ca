// ==========================================
// 工地物资申领履约系统 - 派车调度器
// ==========================================
// 职责:
// - 对账: 每个已批准申领恰好一张派车单（dispatch_id = request_id）
// - 手工派车: 独立校验库存并单次扣减
// - 派车状态机: in-transit -> delivered | delayed
// 红线: 自动派车不触及库存（扣减只发生在批准时）
// 对账方式: 先算差集（应有 - 已有），再逐条幂等写入
// ==========================================

use super::assignment::{policy_for, AssignmentPolicy};
use crate::config::{ConfigManager, DispatchSettings};
use crate::db::SharedConnection;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::dispatch::{Dispatch, Driver, NewManualDispatch};
use crate::domain::material::Material;
use crate::domain::request::MaterialRequest;
use crate::domain::types::{AssignmentPolicyKind, DispatchStatus, RequestStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::OptionalPublisher;
use crate::repository::error::RepositoryError;
use crate::repository::{
    run_in_transaction, ActionLogRepository, DispatchRepository, DriverRepository,
    MaterialRepository, ProjectRepository, RequestRepository,
};
use crate::store::path::{Collection, LedgerPath};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::instrument;
use uuid::Uuid;

/// 系统自动操作的操作人
pub const SYSTEM_ACTOR: &str = "system";

/// 司机名册在操作日志中的实体类型
pub const DRIVERS_ENTITY: &str = "drivers";

// ==========================================
// 结果类型
// ==========================================

/// 单条申领的对账结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// 新建了派车单
    Created { dispatch: Dispatch },
    /// 派车单已存在（重复投递）
    AlreadyDispatched { dispatch_id: String },
    /// 申领未批准，无需派车
    NotApproved { status: RequestStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    pub request_id: String,
    pub error: String,
    pub retryable: bool,
}

/// 全量对账报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub approved: usize,
    pub missing: usize,
    pub created: Vec<String>,
    pub skipped: usize,
    pub failed: Vec<ReconcileFailure>,
}

/// 派车结果（手工派车 / 状态变更）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub dispatch: Dispatch,
    pub material: Option<Material>,
    pub message: String,
}

// ==========================================
// DispatchScheduler - 派车调度器
// ==========================================
pub struct DispatchScheduler {
    conn: SharedConnection,
    config: Arc<ConfigManager>,
    dispatch_repo: Arc<DispatchRepository>,
    driver_repo: Arc<DriverRepository>,
    policy: RwLock<Arc<dyn AssignmentPolicy>>,
    publisher: OptionalPublisher,
}

impl DispatchScheduler {
    /// 创建调度器（司机分配策略取自配置 dispatch.assignment_policy）
    pub fn new(
        conn: SharedConnection,
        config: Arc<ConfigManager>,
        publisher: OptionalPublisher,
    ) -> EngineResult<Self> {
        let kind = config.get_assignment_policy()?;
        tracing::info!(policy = kind.as_str(), "派车调度器已创建");
        Ok(Self {
            dispatch_repo: Arc::new(DispatchRepository::new(conn.clone())),
            driver_repo: Arc::new(DriverRepository::new(conn.clone())),
            conn,
            config,
            policy: RwLock::new(policy_for(kind)),
            publisher,
        })
    }

    /// 当前司机分配策略
    pub fn policy_kind(&self) -> AssignmentPolicyKind {
        self.current_policy()
            .map(|p| p.kind())
            .unwrap_or_default()
    }

    /// 切换司机分配策略（同时写入配置）
    pub fn set_policy(&self, kind: AssignmentPolicyKind) -> EngineResult<()> {
        self.config.set_config_value(
            crate::config::config_keys::DISPATCH_ASSIGNMENT_POLICY,
            kind.as_str(),
        )?;
        let mut guard = self
            .policy
            .write()
            .map_err(|e| EngineError::from(RepositoryError::LockError(e.to_string())))?;
        *guard = policy_for(kind);
        tracing::info!(policy = kind.as_str(), "司机分配策略已切换");
        Ok(())
    }

    fn current_policy(&self) -> EngineResult<Arc<dyn AssignmentPolicy>> {
        self.policy
            .read()
            .map(|p| p.clone())
            .map_err(|e| EngineError::from(RepositoryError::LockError(e.to_string())))
    }

    // ==========================================
    // 自动派车对账
    // ==========================================

    /// 全量对账：为所有“已批准但无派车单”的申领补建派车单
    ///
    /// 单条失败只记入报告，不中断其余申领
    #[instrument(skip(self))]
    pub fn reconcile_all(&self) -> EngineResult<ReconcileReport> {
        let (approved, existing) = {
            let conn = self
                .conn
                .lock()
                .map_err(|e| EngineError::from(RepositoryError::LockError(e.to_string())))?;
            (
                RequestRepository::approved_ids_with(&conn)?,
                DispatchRepository::auto_dispatch_ids_with(&conn)?,
            )
        };

        let missing: Vec<String> = approved
            .iter()
            .filter(|id| !existing.contains(*id))
            .cloned()
            .collect();

        let mut report = ReconcileReport {
            approved: approved.len(),
            missing: missing.len(),
            ..Default::default()
        };

        for request_id in missing {
            match self.reconcile_request(&request_id) {
                Ok(ReconcileAction::Created { .. }) => report.created.push(request_id),
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "自动派车失败，等待下次对账");
                    report.failed.push(ReconcileFailure {
                        request_id,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            approved = report.approved,
            missing = report.missing,
            created = report.created.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "派车对账完成"
        );
        Ok(report)
    }

    /// 单条申领对账（幂等：重复调用至多产生一张派车单）
    #[instrument(skip(self))]
    pub fn reconcile_request(&self, request_id: &str) -> EngineResult<ReconcileAction> {
        // 配置读取需要连接锁，必须在事务外完成
        let settings = self.config.get_dispatch_settings()?;
        let policy = self.current_policy()?;

        let result = run_in_transaction(&self.conn, |tx| -> EngineResult<(ReconcileAction, Option<MaterialRequest>)> {
            let request = RequestRepository::find_by_id_with(tx, request_id)?
                .ok_or_else(|| EngineError::not_found("MaterialRequest", request_id))?;

            if request.status != RequestStatus::Approved {
                return Ok((ReconcileAction::NotApproved { status: request.status }, None));
            }

            if DispatchRepository::exists_with(tx, request_id)? {
                // 派车单已在但标记未写（历史数据）时补写标记
                let marked = RequestRepository::mark_delivery_assigned_with(tx, request_id)?;
                let request = if marked {
                    RequestRepository::find_by_id_with(tx, request_id)?
                } else {
                    None
                };
                return Ok((
                    ReconcileAction::AlreadyDispatched {
                        dispatch_id: request_id.to_string(),
                    },
                    request,
                ));
            }

            let loads = DriverRepository::active_loads_with(tx)?;
            let driver = policy.select(&loads).ok_or(EngineError::NoDriverAvailable)?;
            let to_site = ProjectRepository::find_by_id_with(tx, &request.project_id)?
                .map(|p| p.name)
                .unwrap_or_else(|| request.project_id.clone());

            let dispatch = build_auto_dispatch(&request, &driver, &settings, to_site)?;
            if !DispatchRepository::insert_if_absent_with(tx, &dispatch)? {
                return Ok((
                    ReconcileAction::AlreadyDispatched {
                        dispatch_id: dispatch.dispatch_id,
                    },
                    None,
                ));
            }
            RequestRepository::mark_delivery_assigned_with(tx, request_id)?;

            let log = ActionLog::new(ActionType::AutoDispatch, SYSTEM_ACTOR)
                .with_entity(Collection::Dispatches.as_str(), &dispatch.dispatch_id)
                .with_payload(json!({
                    "request_id": request_id,
                    "driver_id": dispatch.driver_id,
                    "policy": policy.kind().as_str(),
                }))
                .with_detail(format!(
                    "自动派车: {} x{}，{} -> {}，司机 {}（{}）",
                    dispatch.material_name,
                    dispatch.quantity,
                    dispatch.from_site,
                    dispatch.to_site,
                    dispatch.driver_name,
                    dispatch.vehicle_number
                ));
            ActionLogRepository::insert_with(tx, &log)?;

            let request = RequestRepository::find_by_id_with(tx, request_id)?;
            Ok((ReconcileAction::Created { dispatch }, request))
        });

        let (action, updated_request) = match result {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, EngineError::NoDriverAvailable) {
                    tracing::warn!(request_id = %request_id, "没有在岗司机，自动派车推迟");
                }
                return Err(e);
            }
        };

        match &action {
            ReconcileAction::Created { dispatch } => {
                tracing::info!(
                    dispatch_id = %dispatch.dispatch_id,
                    driver_id = %dispatch.driver_id,
                    eta = %dispatch.eta,
                    "自动派车单已创建"
                );
                self.publisher
                    .publish_entity(LedgerPath::dispatch(&dispatch.dispatch_id), dispatch);
            }
            ReconcileAction::AlreadyDispatched { dispatch_id } => {
                tracing::debug!(dispatch_id = %dispatch_id, "派车单已存在，跳过");
            }
            ReconcileAction::NotApproved { status } => {
                tracing::debug!(request_id = %request_id, status = %status, "申领未批准，跳过");
            }
        }
        if let Some(request) = updated_request {
            self.publisher
                .publish_entity(LedgerPath::request(request_id), &request);
        }
        Ok(action)
    }

    // ==========================================
    // 手工派车
    // ==========================================

    /// 手工派车（不关联申领；独立校验并扣减库存一次）
    #[instrument(skip(self, new_dispatch), fields(material_id = %new_dispatch.material_id))]
    pub fn create_dispatch(
        &self,
        new_dispatch: NewManualDispatch,
        actor: &str,
    ) -> EngineResult<DispatchOutcome> {
        if new_dispatch.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "派车数量必须大于0: quantity={}",
                new_dispatch.quantity
            )));
        }
        for (field, value) in [
            ("material_id", &new_dispatch.material_id),
            ("driver_id", &new_dispatch.driver_id),
            ("to_site", &new_dispatch.to_site),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::Validation(format!("缺少必填字段: {}", field)));
            }
        }

        let settings = self.config.get_dispatch_settings()?;

        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<DispatchOutcome> {
            let material = MaterialRepository::find_by_id_with(tx, &new_dispatch.material_id)?
                .ok_or_else(|| EngineError::not_found("Material", &new_dispatch.material_id))?;
            let insufficient = || EngineError::InsufficientStock {
                material_id: material.material_id.clone(),
                available: material.quantity,
                requested: new_dispatch.quantity,
            };
            if new_dispatch.quantity > material.quantity {
                return Err(insufficient());
            }

            let driver = DriverRepository::find_by_id_with(tx, &new_dispatch.driver_id)?
                .ok_or_else(|| EngineError::not_found("Driver", &new_dispatch.driver_id))?;
            if !driver.active {
                return Err(EngineError::Validation(format!(
                    "司机已停用: driver_id={}",
                    driver.driver_id
                )));
            }

            let now = Utc::now();
            if !MaterialRepository::adjust_quantity_with(
                tx,
                &material.material_id,
                -new_dispatch.quantity,
                &now,
            )? {
                return Err(insufficient());
            }

            let dispatch = Dispatch {
                dispatch_id: Uuid::new_v4().to_string(),
                request_id: None,
                material_id: material.material_id.clone(),
                material_name: material.name.clone(),
                quantity: new_dispatch.quantity,
                from_site: new_dispatch
                    .from_site
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| settings.default_from_site.clone()),
                to_site: new_dispatch.to_site.trim().to_string(),
                driver_id: driver.driver_id.clone(),
                driver_name: driver.name.clone(),
                vehicle_number: new_dispatch
                    .vehicle_number
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| driver.vehicle_number.clone()),
                status: DispatchStatus::InTransit,
                dispatch_time: now,
                eta: match new_dispatch.eta {
                    Some(eta) => eta,
                    None => eta_after(now, settings.eta_days)?,
                },
                delivery_time: None,
            };
            if !DispatchRepository::insert_if_absent_with(tx, &dispatch)? {
                return Err(EngineError::StoreIo(format!(
                    "派车单写入未生效: dispatch_id={}",
                    dispatch.dispatch_id
                )));
            }

            let material = MaterialRepository::find_by_id_with(tx, &dispatch.material_id)?
                .ok_or_else(|| EngineError::not_found("Material", &dispatch.material_id))?;
            let summary = format!(
                "手工派车: {} 库存 -{}（剩余 {}），{} -> {}",
                material.name, dispatch.quantity, material.quantity, dispatch.from_site, dispatch.to_site
            );
            let log = ActionLog::new(ActionType::ManualDispatch, actor)
                .with_entity(Collection::Dispatches.as_str(), &dispatch.dispatch_id)
                .with_payload(json!({
                    "material_id": dispatch.material_id,
                    "quantity_deducted": dispatch.quantity,
                    "driver_id": dispatch.driver_id,
                }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            Ok(DispatchOutcome {
                dispatch,
                material: Some(material),
                message: summary,
            })
        })
        .map_err(|e| {
            tracing::warn!(error = %e, "手工派车失败");
            e
        })?;

        tracing::info!(
            dispatch_id = %outcome.dispatch.dispatch_id,
            quantity = outcome.dispatch.quantity,
            "手工派车单已创建"
        );
        if let Some(material) = &outcome.material {
            self.publisher
                .publish_entity(LedgerPath::material(&material.material_id), material);
        }
        self.publisher
            .publish_entity(LedgerPath::dispatch(&outcome.dispatch.dispatch_id), &outcome.dispatch);
        Ok(outcome)
    }

    // ==========================================
    // 派车状态
    // ==========================================

    /// 更新派车状态
    ///
    /// 合法转换: in-transit -> delivered（写入送达时间） / in-transit -> delayed
    #[instrument(skip(self))]
    pub fn update_status(
        &self,
        dispatch_id: &str,
        new_status: DispatchStatus,
        actor: &str,
    ) -> EngineResult<DispatchOutcome> {
        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<DispatchOutcome> {
            let current = DispatchRepository::find_by_id_with(tx, dispatch_id)?
                .ok_or_else(|| EngineError::not_found("Dispatch", dispatch_id))?;
            let invalid = || EngineError::InvalidStateTransition {
                from: current.status.to_string(),
                to: new_status.to_string(),
            };
            if !current.status.can_transition_to(new_status) {
                return Err(invalid());
            }

            let now = Utc::now();
            let delivery_time = (new_status == DispatchStatus::Delivered).then_some(now);
            if !DispatchRepository::transition_status_with(
                tx,
                dispatch_id,
                current.status,
                new_status,
                delivery_time.as_ref(),
            )? {
                return Err(invalid());
            }

            let summary = format!(
                "派车状态: {} -> {}（{} x{}）",
                current.status, new_status, current.material_name, current.quantity
            );
            let log = ActionLog::new(ActionType::DispatchStatusChange, actor)
                .with_entity(Collection::Dispatches.as_str(), dispatch_id)
                .with_payload(json!({
                    "from": current.status.as_str(),
                    "to": new_status.as_str(),
                }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            let dispatch = DispatchRepository::find_by_id_with(tx, dispatch_id)?
                .ok_or_else(|| EngineError::not_found("Dispatch", dispatch_id))?;
            Ok(DispatchOutcome {
                dispatch,
                material: None,
                message: summary,
            })
        })
        .map_err(|e| {
            tracing::warn!(dispatch_id = %dispatch_id, error = %e, "派车状态更新失败");
            e
        })?;

        tracing::info!(dispatch_id = %dispatch_id, status = %new_status, "派车状态已更新");
        self.publisher
            .publish_entity(LedgerPath::dispatch(dispatch_id), &outcome.dispatch);
        Ok(outcome)
    }

    // ==========================================
    // 司机名册
    // ==========================================

    /// 登记司机（默认在岗）
    pub fn register_driver(&self, name: &str, vehicle_number: &str, actor: &str) -> EngineResult<Driver> {
        if name.trim().is_empty() || vehicle_number.trim().is_empty() {
            return Err(EngineError::Validation(
                "司机姓名与车牌号不能为空".to_string(),
            ));
        }
        let driver = Driver {
            driver_id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            vehicle_number: vehicle_number.trim().to_string(),
            active: true,
            created_at: Utc::now(),
        };

        run_in_transaction(&self.conn, |tx| -> EngineResult<()> {
            DriverRepository::insert_with(tx, &driver)?;
            let log = ActionLog::new(ActionType::DriverUpsert, actor)
                .with_entity(DRIVERS_ENTITY, &driver.driver_id)
                .with_detail(format!("登记司机 {}（{}）", driver.name, driver.vehicle_number));
            ActionLogRepository::insert_with(tx, &log)?;
            Ok(())
        })?;

        tracing::info!(driver_id = %driver.driver_id, name = %driver.name, "司机已登记");
        Ok(driver)
    }

    /// 设置司机在岗/停用
    pub fn set_driver_active(&self, driver_id: &str, active: bool, actor: &str) -> EngineResult<Driver> {
        let driver = run_in_transaction(&self.conn, |tx| -> EngineResult<Driver> {
            DriverRepository::set_active_with(tx, driver_id, active)?;
            let log = ActionLog::new(ActionType::DriverUpsert, actor)
                .with_entity(DRIVERS_ENTITY, driver_id)
                .with_detail(if active { "司机恢复在岗" } else { "司机停用" });
            ActionLogRepository::insert_with(tx, &log)?;
            DriverRepository::find_by_id_with(tx, driver_id)?
                .ok_or_else(|| EngineError::not_found("Driver", driver_id))
        })?;

        tracing::info!(driver_id = %driver_id, active, "司机状态已更新");
        Ok(driver)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn list_drivers(&self) -> EngineResult<Vec<Driver>> {
        Ok(self.driver_repo.list_all()?)
    }

    pub fn get_dispatch(&self, dispatch_id: &str) -> EngineResult<Dispatch> {
        self.dispatch_repo
            .find_by_id(dispatch_id)?
            .ok_or_else(|| EngineError::not_found("Dispatch", dispatch_id))
    }

    /// 派车单列表（可按状态过滤）
    pub fn list_dispatches(&self, status: Option<DispatchStatus>) -> EngineResult<Vec<Dispatch>> {
        Ok(match status {
            Some(status) => self.dispatch_repo.find_by_status(status)?,
            None => self.dispatch_repo.list_all()?,
        })
    }

    /// 关联某申领的派车单数量
    pub fn dispatch_count_for_request(&self, request_id: &str) -> EngineResult<i64> {
        Ok(self.dispatch_repo.count_by_request(request_id)?)
    }
}

/// 构造自动派车单（dispatch_id = request_id）
fn build_auto_dispatch(
    request: &MaterialRequest,
    driver: &Driver,
    settings: &DispatchSettings,
    to_site: String,
) -> EngineResult<Dispatch> {
    let now = Utc::now();
    Ok(Dispatch {
        dispatch_id: request.request_id.clone(),
        request_id: Some(request.request_id.clone()),
        material_id: request.material_id.clone(),
        material_name: request.material_name.clone(),
        quantity: request.quantity_requested,
        from_site: settings.default_from_site.clone(),
        to_site,
        driver_id: driver.driver_id.clone(),
        driver_name: driver.name.clone(),
        vehicle_number: driver.vehicle_number.clone(),
        status: DispatchStatus::InTransit,
        dispatch_time: now,
        eta: eta_after(now, settings.eta_days)?,
        delivery_time: None,
    })
}

/// dispatch_time + eta_days；越界返回 Validation
pub(crate) fn eta_after(now: DateTime<Utc>, eta_days: i64) -> EngineResult<DateTime<Utc>> {
    Duration::try_days(eta_days)
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or_else(|| EngineError::Validation(format!("ETA 天数超出范围: {}", eta_days)))
}
