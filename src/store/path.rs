// ==========================================
// 工地物资申领履约系统 - 账本路径
// ==========================================
// 路径格式: {collection}/{id}
// materials/{id} projects/{id} material_requests/{id} dispatches/{id} stock_audits/{id}
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Materials,
    Projects,
    MaterialRequests,
    Dispatches,
    StockAudits,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Materials => "materials",
            Collection::Projects => "projects",
            Collection::MaterialRequests => "material_requests",
            Collection::Dispatches => "dispatches",
            Collection::StockAudits => "stock_audits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "materials" => Some(Collection::Materials),
            "projects" => Some(Collection::Projects),
            "material_requests" => Some(Collection::MaterialRequests),
            "dispatches" => Some(Collection::Dispatches),
            "stock_audits" => Some(Collection::StockAudits),
            _ => None,
        }
    }
}

/// 账本中单条记录的路径
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerPath {
    pub collection: Collection,
    pub id: String,
}

impl LedgerPath {
    pub fn new(collection: Collection, id: &str) -> Self {
        Self {
            collection,
            id: id.to_string(),
        }
    }

    pub fn material(id: &str) -> Self {
        Self::new(Collection::Materials, id)
    }

    pub fn project(id: &str) -> Self {
        Self::new(Collection::Projects, id)
    }

    pub fn request(id: &str) -> Self {
        Self::new(Collection::MaterialRequests, id)
    }

    pub fn dispatch(id: &str) -> Self {
        Self::new(Collection::Dispatches, id)
    }

    pub fn stock_audit(id: &str) -> Self {
        Self::new(Collection::StockAudits, id)
    }

    /// 解析 `collection/id`；集合未知或 id 为空时返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        let (collection, id) = raw.trim().trim_matches('/').split_once('/')?;
        let collection = Collection::parse(collection)?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(Self::new(collection, id))
    }
}

impl fmt::Display for LedgerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.id)
    }
}
