// ==========================================
// 工地物资申领履约系统 - 派车领域模型
// ==========================================
// 派车单来源:
// - 自动: 与已批准申领一一对应，dispatch_id = request_id（幂等键）
// - 手工: 独立ID，不关联申领
// 红线: 派车状态机与申领状态机分离，仅通过 request_id 关联
// 对齐: dispatches / drivers 表
// ==========================================

use crate::domain::types::DispatchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Dispatch - 派车单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub dispatch_id: String,
    #[serde(default)]
    pub request_id: Option<String>, // 自动派车时等于 dispatch_id
    pub material_id: String,
    #[serde(default)]
    pub material_name: String,
    pub quantity: i64,
    #[serde(default)]
    pub from_site: String,
    #[serde(default)]
    pub to_site: String,
    pub driver_id: String,
    #[serde(default)]
    pub driver_name: String,
    #[serde(default)]
    pub vehicle_number: String,
    pub status: DispatchStatus,
    pub dispatch_time: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    #[serde(default)]
    pub delivery_time: Option<DateTime<Utc>>,
}

impl Dispatch {
    /// 是否为申领自动生成的派车单
    pub fn is_auto(&self) -> bool {
        self.request_id.is_some()
    }
}

// ==========================================
// NewManualDispatch - 手工派车入参
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManualDispatch {
    pub material_id: String,
    pub quantity: i64,
    pub driver_id: String,
    pub vehicle_number: Option<String>, // 为空时使用司机登记车辆
    pub from_site: Option<String>,      // 为空时使用默认发货仓
    pub to_site: String,
    pub eta: Option<DateTime<Utc>>,     // 为空时 = 发车时间 + 配置天数
}

// ==========================================
// Driver - 司机名册
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub driver_id: String,
    pub name: String,
    pub vehicle_number: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// 司机及其当前负载（供分配策略使用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLoad {
    pub driver: Driver,
    pub in_transit: i64, // 运输中派车单数
}
