// ==========================================
// 工地物资申领履约系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value)
// 约定: 缺失或格式错误的配置回退默认值并告警，不中断业务
// ==========================================

use crate::db::SharedConnection;
use crate::domain::types::AssignmentPolicyKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::MutexGuard;

// ==========================================
// 默认值
// ==========================================
pub const DEFAULT_ETA_DAYS: i64 = 2;
pub const DEFAULT_FROM_SITE: &str = "Central Warehouse";
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;
/// ETA 天数上限（含）
pub const MAX_ETA_DAYS: i64 = 365;

/// 派车相关配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    pub eta_days: i64,
    pub assignment_policy: AssignmentPolicyKind,
    pub default_from_site: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            eta_days: DEFAULT_ETA_DAYS,
            assignment_policy: AssignmentPolicyKind::default(),
            default_from_site: DEFAULT_FROM_SITE.to_string(),
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    /// 从共享连接创建 ConfigManager
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 写入配置值（UPSERT）
    ///
    /// 已知配置键会先校验格式，格式错误返回 FieldValueError
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        validate(key, value)?;
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        tracing::info!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 获取所有配置的快照（JSON，含默认值）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let mut config_map: BTreeMap<String, String> = config_keys::DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 派车配置 =====

    /// 自动派车 ETA 天数（默认 2）
    pub fn get_eta_days(&self) -> RepositoryResult<i64> {
        let value = self.get_config_or_default(config_keys::DISPATCH_ETA_DAYS, "2")?;
        Ok(match value.trim().parse::<i64>() {
            Ok(days) if (0..=MAX_ETA_DAYS).contains(&days) => days,
            _ => {
                tracing::warn!(
                    config_key = config_keys::DISPATCH_ETA_DAYS,
                    raw_value = %value,
                    "ETA 天数配置格式错误，使用默认值"
                );
                DEFAULT_ETA_DAYS
            }
        })
    }

    /// 司机分配策略（默认 first_available）
    pub fn get_assignment_policy(&self) -> RepositoryResult<AssignmentPolicyKind> {
        let value =
            self.get_config_or_default(config_keys::DISPATCH_ASSIGNMENT_POLICY, "first_available")?;
        Ok(AssignmentPolicyKind::parse(value.trim()).unwrap_or_else(|| {
            tracing::warn!(
                config_key = config_keys::DISPATCH_ASSIGNMENT_POLICY,
                raw_value = %value,
                "未知的司机分配策略，使用 first_available"
            );
            AssignmentPolicyKind::default()
        }))
    }

    /// 默认发货地点
    pub fn get_default_from_site(&self) -> RepositoryResult<String> {
        let value = self.get_config_or_default(config_keys::DISPATCH_DEFAULT_FROM_SITE, DEFAULT_FROM_SITE)?;
        let trimmed = value.trim();
        Ok(if trimmed.is_empty() {
            DEFAULT_FROM_SITE.to_string()
        } else {
            trimmed.to_string()
        })
    }

    pub fn get_dispatch_settings(&self) -> RepositoryResult<DispatchSettings> {
        Ok(DispatchSettings {
            eta_days: self.get_eta_days()?,
            assignment_policy: self.get_assignment_policy()?,
            default_from_site: self.get_default_from_site()?,
        })
    }

    // ===== 库存配置 =====

    /// 低库存阈值（默认 10）
    pub fn get_low_stock_threshold(&self) -> RepositoryResult<i64> {
        let value = self.get_config_or_default(config_keys::STOCK_LOW_THRESHOLD, "10")?;
        Ok(value
            .trim()
            .parse::<i64>()
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD))
    }
}

fn validate(key: &str, value: &str) -> RepositoryResult<()> {
    let bad = |message: &str| RepositoryError::FieldValueError {
        field: key.to_string(),
        message: format!("{}: {}", message, value),
    };
    match key {
        config_keys::DISPATCH_ETA_DAYS => match value.trim().parse::<i64>() {
            Ok(days) if (0..=MAX_ETA_DAYS).contains(&days) => Ok(()),
            _ => Err(bad(&format!("ETA 天数必须为 0..={} 的整数", MAX_ETA_DAYS))),
        },
        config_keys::STOCK_LOW_THRESHOLD => value
            .trim()
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| bad("低库存阈值必须为整数")),
        config_keys::DISPATCH_ASSIGNMENT_POLICY => AssignmentPolicyKind::parse(value.trim())
            .map(|_| ())
            .ok_or_else(|| bad("未知的司机分配策略")),
        _ => Ok(()),
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 派车
    pub const DISPATCH_ETA_DAYS: &str = "dispatch.eta_days";
    pub const DISPATCH_ASSIGNMENT_POLICY: &str = "dispatch.assignment_policy";
    pub const DISPATCH_DEFAULT_FROM_SITE: &str = "dispatch.default_from_site";

    // 库存
    pub const STOCK_LOW_THRESHOLD: &str = "stock.low_threshold";

    pub const DEFAULTS: &[(&str, &str)] = &[
        (DISPATCH_ETA_DAYS, "2"),
        (DISPATCH_ASSIGNMENT_POLICY, "first_available"),
        (DISPATCH_DEFAULT_FROM_SITE, super::DEFAULT_FROM_SITE),
        (STOCK_LOW_THRESHOLD, "10"),
    ];
}
