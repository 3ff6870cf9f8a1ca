// ==========================================
// 工地物资申领履约系统 - 存储适配边界编解码
// ==========================================
// 职责: 时间戳与枚举列的文本编码/解码
// 红线: 原始行结构不越过仓储层；未知枚举值报错，不静默兜底
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// 时间戳编码（RFC3339，UTC，固定微秒位宽：文本序 = 时间序）
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 时间戳解码
pub fn parse_ts(field: &str, raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // 兼容 SQLite datetime('now') 写入的格式
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("无法解析时间 '{}': {}", raw, e),
        })
}

/// 可空时间戳解码
pub fn parse_opt_ts(field: &str, raw: Option<String>) -> RepositoryResult<Option<DateTime<Utc>>> {
    match raw {
        Some(s) if !s.trim().is_empty() => parse_ts(field, &s).map(Some),
        _ => Ok(None),
    }
}

/// 枚举列解码
pub fn parse_enum<T>(field: &str, raw: &str, parse: fn(&str) -> Option<T>) -> RepositoryResult<T> {
    parse(raw).ok_or_else(|| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("未知取值 '{}'", raw),
    })
}

/// 可空文本列：NULL 或空白时取默认值
pub fn or_default(raw: Option<String>, default: &str) -> String {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}
