// ==========================================
// 工地物资申领履约系统 - 盘点记录领域模型
// ==========================================
// 红线: 只追加，不修改；每次盘点同时覆写物资库存
// 对齐: stock_audits 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAudit {
    pub audit_id: String,
    pub material_id: String,
    #[serde(default)]
    pub material_name: String,
    pub recorded_quantity: i64, // 盘点前账面数量
    pub actual_quantity: i64,   // 实盘数量
    pub audited_at: DateTime<Utc>,
    pub audited_by: String,
}

impl StockAudit {
    /// 账实差异（正数 = 盘亏）
    pub fn shortfall(&self) -> i64 {
        self.recorded_quantity - self.actual_quantity
    }
}
