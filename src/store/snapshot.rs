// ==========================================
// 工地物资申领履约系统 - 变更快照
// ==========================================
// 快照 = 某路径在某时刻的完整取值（None 表示已删除）
// 红线: 快照只在存储适配边界按实体 schema 解码，不向下游传递原始 JSON
// ==========================================

use crate::store::path::LedgerPath;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("快照序列化失败 ({path}): {message}")]
    Encode { path: String, message: String },

    #[error("快照解码失败 ({path}): {message}")]
    Decode { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub path: LedgerPath,
    pub value: Option<JsonValue>,
    pub published_at: DateTime<Utc>,
}

impl Snapshot {
    /// 由实体构造快照
    pub fn of<T: Serialize>(path: LedgerPath, entity: &T) -> Result<Self, SnapshotError> {
        let value = serde_json::to_value(entity).map_err(|e| SnapshotError::Encode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path,
            value: Some(value),
            published_at: Utc::now(),
        })
    }

    /// 路径当前无值
    pub fn absent(path: LedgerPath) -> Self {
        Self {
            path,
            value: None,
            published_at: Utc::now(),
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// 按实体 schema 解码（缺省字段由实体的 serde 默认值填充）
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, SnapshotError> {
        match &self.value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SnapshotError::Decode {
                    path: self.path.to_string(),
                    message: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MaterialRequest, RequestStatus};
    use serde_json::json;

    #[test]
    fn test_decode_fills_optional_fields() {
        let snapshot = Snapshot {
            path: LedgerPath::request("r1"),
            value: Some(json!({
                "request_id": "r1",
                "material_id": "m1",
                "quantity_requested": 30,
                "total_cost": 300.0,
                "project_id": "p1",
                "status": "approved",
                "requested_at": "2026-01-01T00:00:00Z"
            })),
            published_at: Utc::now(),
        };
        let request: MaterialRequest = snapshot.decode().unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert!(!request.delivery_assigned);
        assert!(request.awaits_dispatch());
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        let snapshot = Snapshot {
            path: LedgerPath::request("r1"),
            value: Some(json!({ "request_id": "r1" })),
            published_at: Utc::now(),
        };
        assert!(snapshot.decode::<MaterialRequest>().is_err());
    }

    #[test]
    fn test_absent_decodes_to_none() {
        let snapshot = Snapshot::absent(LedgerPath::dispatch("d1"));
        assert!(!snapshot.exists());
        assert!(snapshot.decode::<MaterialRequest>().unwrap().is_none());
    }
}
