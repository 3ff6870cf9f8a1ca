// ==========================================
// 工地物资申领履约系统 - 项目预算领域模型
// ==========================================
// 红线: 每次批准后 spent <= budget
// 对齐: projects 表
// ==========================================

use crate::domain::types::MONEY_EPSILON;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Project - 项目（预算上限 + 累计支出）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub budget: f64, // 预算上限
    #[serde(default)]
    pub spent: f64, // 累计支出
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// 剩余可用预算（不小于 0）
    pub fn remaining(&self) -> f64 {
        (self.budget - self.spent).max(0.0)
    }

    /// 判断一笔支出是否在剩余预算之内
    pub fn can_afford(&self, cost: f64) -> bool {
        cost <= self.budget - self.spent + MONEY_EPSILON
    }
}
