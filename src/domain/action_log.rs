// ==========================================
// 工地物资申领履约系统 - 操作日志领域模型
// ==========================================
// 红线: 所有写入必须记录（与业务写入同一事务提交）
// 用途: 审计追踪
// 对齐: action_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,        // 日志ID
    pub action_type: String,      // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime, // 操作时间戳
    pub actor: String,            // 操作人（自由文本）

    // ===== 作用对象 =====
    pub entity_type: Option<String>, // materials / projects / material_requests / dispatches / stock_audits
    pub entity_id: Option<String>,

    // ===== 操作负载 =====
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>, // 可读描述（含变化量）
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    SubmitRequest,        // 提交申领
    ApproveRequest,       // 批准申领
    RejectRequest,        // 驳回申领
    AutoDispatch,         // 自动派车
    ManualDispatch,       // 手工派车
    DispatchStatusChange, // 派车状态变更
    StockAudit,           // 盘点对账
    MaterialUpsert,       // 物资建档/调价
    MaterialRestock,      // 物资补货
    ProjectUpsert,        // 项目建档
    BudgetTopUp,          // 追加预算
    DriverUpsert,         // 司机登记/停用
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SubmitRequest => "SubmitRequest",
            ActionType::ApproveRequest => "ApproveRequest",
            ActionType::RejectRequest => "RejectRequest",
            ActionType::AutoDispatch => "AutoDispatch",
            ActionType::ManualDispatch => "ManualDispatch",
            ActionType::DispatchStatusChange => "DispatchStatusChange",
            ActionType::StockAudit => "StockAudit",
            ActionType::MaterialUpsert => "MaterialUpsert",
            ActionType::MaterialRestock => "MaterialRestock",
            ActionType::ProjectUpsert => "ProjectUpsert",
            ActionType::BudgetTopUp => "BudgetTopUp",
            ActionType::DriverUpsert => "DriverUpsert",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SubmitRequest" => Some(ActionType::SubmitRequest),
            "ApproveRequest" => Some(ActionType::ApproveRequest),
            "RejectRequest" => Some(ActionType::RejectRequest),
            "AutoDispatch" => Some(ActionType::AutoDispatch),
            "ManualDispatch" => Some(ActionType::ManualDispatch),
            "DispatchStatusChange" => Some(ActionType::DispatchStatusChange),
            "StockAudit" => Some(ActionType::StockAudit),
            "MaterialUpsert" => Some(ActionType::MaterialUpsert),
            "MaterialRestock" => Some(ActionType::MaterialRestock),
            "ProjectUpsert" => Some(ActionType::ProjectUpsert),
            "BudgetTopUp" => Some(ActionType::BudgetTopUp),
            "DriverUpsert" => Some(ActionType::DriverUpsert),
            _ => None,
        }
    }
}

// ==========================================
// ActionLog 辅助方法
// ==========================================
impl ActionLog {
    /// 创建新的操作日志（action_id 自动生成）
    pub fn new(action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Utc::now().naive_utc(),
            actor: actor.to_string(),
            entity_type: None,
            entity_id: None,
            payload_json: None,
            detail: None,
        }
    }

    /// 设置作用对象
    pub fn with_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// 设置操作负载
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }

    /// 设置详细描述
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// 解析操作类型（未知类型返回 None）
    pub fn kind(&self) -> Option<ActionType> {
        ActionType::parse(&self.action_type)
    }
}
