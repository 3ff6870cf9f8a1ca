// ==========================================
// 工地物资申领履约系统 - 盘点对账引擎
// ==========================================
// 职责: 账面数量 vs 实盘数量对账
// - 追加盘点记录（recorded = 当前账面，actual = 实盘）
// - 账面数量覆写为实盘数量
// 并发: 与批准/手工派车共用事务串行化点，同一物资上线性一致
// ==========================================

use crate::db::SharedConnection;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::audit::StockAudit;
use crate::domain::material::Material;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::OptionalPublisher;
use crate::repository::{
    run_in_transaction, ActionLogRepository, MaterialRepository, StockAuditRepository,
};
use crate::store::path::{Collection, LedgerPath};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// 盘点结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub audit: StockAudit,
    pub material: Material,
    pub message: String,
}

// ==========================================
// StockAuditEngine - 盘点对账引擎
// ==========================================
pub struct StockAuditEngine {
    conn: SharedConnection,
    audit_repo: Arc<StockAuditRepository>,
    publisher: OptionalPublisher,
}

impl StockAuditEngine {
    pub fn new(conn: SharedConnection, publisher: OptionalPublisher) -> Self {
        Self {
            audit_repo: Arc::new(StockAuditRepository::new(conn.clone())),
            conn,
            publisher,
        }
    }

    /// 记录盘点
    ///
    /// 同一实盘数量重复提交: 账面数量不再变化，但每次都追加一条记录
    #[instrument(skip(self))]
    pub fn record_audit(
        &self,
        material_id: &str,
        actual_quantity: i64,
        audited_by: &str,
    ) -> EngineResult<AuditOutcome> {
        if actual_quantity < 0 {
            return Err(EngineError::Validation(format!(
                "实盘数量不能为负: actual_quantity={}",
                actual_quantity
            )));
        }
        if audited_by.trim().is_empty() {
            return Err(EngineError::Validation("缺少必填字段: audited_by".to_string()));
        }

        let outcome = run_in_transaction(&self.conn, |tx| -> EngineResult<AuditOutcome> {
            let material = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;

            let now = Utc::now();
            let audit = StockAudit {
                audit_id: Uuid::new_v4().to_string(),
                material_id: material.material_id.clone(),
                material_name: material.name.clone(),
                recorded_quantity: material.quantity,
                actual_quantity,
                audited_at: now,
                audited_by: audited_by.trim().to_string(),
            };
            StockAuditRepository::append_with(tx, &audit)?;
            MaterialRepository::set_quantity_with(tx, material_id, actual_quantity, &now)?;

            let delta = actual_quantity - audit.recorded_quantity;
            let summary = format!(
                "盘点: {} 账面 {} -> 实盘 {}（差异 {:+}）",
                material.name, audit.recorded_quantity, actual_quantity, delta
            );
            let log = ActionLog::new(ActionType::StockAudit, &audit.audited_by)
                .with_entity(Collection::StockAudits.as_str(), &audit.audit_id)
                .with_payload(json!({
                    "material_id": material_id,
                    "recorded_quantity": audit.recorded_quantity,
                    "actual_quantity": actual_quantity,
                }))
                .with_detail(summary.clone());
            ActionLogRepository::insert_with(tx, &log)?;

            let material = MaterialRepository::find_by_id_with(tx, material_id)?
                .ok_or_else(|| EngineError::not_found("Material", material_id))?;
            Ok(AuditOutcome {
                audit,
                material,
                message: summary,
            })
        })
        .map_err(|e| {
            tracing::warn!(material_id = %material_id, error = %e, "盘点记录失败");
            e
        })?;

        tracing::info!(
            material_id = %material_id,
            recorded = outcome.audit.recorded_quantity,
            actual = outcome.audit.actual_quantity,
            "盘点已记录"
        );
        self.publisher
            .publish_entity(LedgerPath::stock_audit(&outcome.audit.audit_id), &outcome.audit);
        self.publisher
            .publish_entity(LedgerPath::material(material_id), &outcome.material);
        Ok(outcome)
    }

    /// 某物资的盘点时间序列
    pub fn audits_for(&self, material_id: &str) -> EngineResult<Vec<StockAudit>> {
        Ok(self.audit_repo.find_by_material(material_id)?)
    }

    pub fn list_audits(&self) -> EngineResult<Vec<StockAudit>> {
        Ok(self.audit_repo.list_all()?)
    }
}
