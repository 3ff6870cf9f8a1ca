// ==========================================
// 工地物资申领履约系统 - 物资申领领域模型
// ==========================================
// 状态机: pending -> approved | rejected（仅一次，之后为终态）
// 红线: delivery_assigned 只允许 false -> true
// 对齐: material_requests 表
// ==========================================

use crate::domain::types::RequestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// MaterialRequest - 物资申领单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRequest {
    pub request_id: String,
    pub material_id: String,
    #[serde(default)]
    pub material_name: String, // 冗余物资名称（申领时刻）
    pub quantity_requested: i64,
    pub total_cost: f64, // 申领时按单价计算
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    pub project_id: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_message: Option<String>,
    #[serde(default)]
    pub delivery_assigned: bool,
}

impl MaterialRequest {
    /// 是否需要自动派车（已批准但尚未分配配送）
    pub fn awaits_dispatch(&self) -> bool {
        self.status == RequestStatus::Approved && !self.delivery_assigned
    }
}

// ==========================================
// Requester - 申领人（自由文本，不做鉴权）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub username: String,
}

impl Requester {
    pub fn new(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
        }
    }
}
