// ==========================================
// 工地物资申领履约系统 - 物资领域模型
// ==========================================
// 用途: 库存主档（数量、单价、分类）
// 红线: quantity 永不为负；物资不做静默删除
// 对齐: materials 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CATEGORY: &str = "Uncategorized";
pub const DEFAULT_UNIT_TYPE: &str = "unit";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_unit_type() -> String {
    DEFAULT_UNIT_TYPE.to_string()
}

// ==========================================
// Material - 物资
// ==========================================
// 写入方: 运维录入 / 审批扣减 / 手工派车扣减 / 盘点对账覆写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub material_id: String,
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_unit_type")]
    pub unit_type: String,
    pub price: f64,    // 单价（币种无关）
    pub quantity: i64, // 当前库存（>= 0）
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Material {
    /// 指定数量的总价
    pub fn cost_of(&self, quantity: i64) -> f64 {
        self.price * quantity as f64
    }
}

// ==========================================
// NewMaterial - 新建物资入参
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMaterial {
    pub name: String,
    pub category: Option<String>,
    pub unit_type: Option<String>,
    pub price: f64,
    pub quantity: i64,
    pub supplier: Option<String>,
    pub description: Option<String>,
}

impl NewMaterial {
    /// 便捷构造（其余字段取默认值）
    pub fn simple(name: &str, category: &str, price: f64, quantity: i64) -> Self {
        Self {
            name: name.to_string(),
            category: Some(category.to_string()),
            unit_type: None,
            price,
            quantity,
            supplier: None,
            description: None,
        }
    }

    /// 转换为实体，缺省字段在此填充
    pub fn into_material(self, material_id: String, now: DateTime<Utc>) -> Material {
        Material {
            material_id,
            name: self.name.trim().to_string(),
            category: self
                .category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(default_category),
            unit_type: self
                .unit_type
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(default_unit_type),
            price: self.price,
            quantity: self.quantity,
            supplier: self.supplier.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }
}
