use crate::engine::{EngineError, EngineResult, ExportError};
use crate::perf::PerfGuard;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// 公共工具：错误映射、时间解析、阻塞任务
// ==========================================

/// 错误响应（返回给调用方）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 稳定错误码
    pub code: String,

    /// 错误消息（含具体数值）
    pub message: String,

    /// 详细信息（数值字段 + 是否可原样重试）
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn into_json(self) -> String {
        let fallback = self.message.clone();
        serde_json::to_string(&self).unwrap_or(fallback)
    }
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let details = match err {
            EngineError::InsufficientStock {
                material_id,
                available,
                requested,
            } => serde_json::json!({
                "material_id": material_id,
                "available": available,
                "requested": requested,
            }),
            EngineError::BudgetExceeded {
                project_id,
                available,
                requested,
            } => serde_json::json!({
                "project_id": project_id,
                "available": available,
                "requested": requested,
            }),
            EngineError::NotFound { entity, id } => serde_json::json!({
                "entity": entity,
                "id": id,
            }),
            EngineError::AlreadyResolved { request_id, status } => serde_json::json!({
                "request_id": request_id,
                "status": status,
            }),
            EngineError::InvalidStateTransition { from, to } => serde_json::json!({
                "from": from,
                "to": to,
            }),
            EngineError::Validation(_) | EngineError::NoDriverAvailable | EngineError::StoreIo(_) => {
                serde_json::json!({})
            }
        };

        let mut details = details;
        if let Some(obj) = details.as_object_mut() {
            obj.insert("retryable".to_string(), serde_json::json!(err.is_retryable()));
        }

        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: Some(details),
        }
    }
}

/// 将 EngineError 转换为 JSON 字符串
pub(crate) fn map_engine_error(err: EngineError) -> String {
    ErrorResponse::from(&err).into_json()
}

pub(crate) fn map_export_error(err: ExportError) -> String {
    ErrorResponse::new("EXPORT_ERROR", err.to_string()).into_json()
}

/// 输入在进入引擎前即被拒绝（格式错误等）
pub(crate) fn invalid_input(message: impl Into<String>) -> String {
    map_engine_error(EngineError::Validation(message.into()))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("序列化失败: {}", e))
}

/// 在阻塞线程池执行引擎调用（SQLite 调用不占用 async worker）
pub(crate) async fn run_blocking<T, F>(op: &'static str, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> EngineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _perf = PerfGuard::new(op);
        f()
    })
    .await
    .map_err(|e| format!("任务执行失败: {}", e))?
    .map_err(map_engine_error)
}

/// 解析时间参数: RFC3339 或 YYYY-MM-DD（按 UTC 零点）
pub(crate) fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|e| {
        invalid_input(format!(
            "时间格式错误（应为RFC3339或YYYY-MM-DD）: {} ({})",
            trimmed, e
        ))
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| invalid_input(format!("无效日期: {}", trimmed)))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

pub(crate) fn parse_time_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_time(&s))
        .transpose()
}
