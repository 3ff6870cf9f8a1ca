// ==========================================
// 日志初始化
// ==========================================
// tracing + tracing-subscriber
// - RUST_LOG: 过滤指令（默认 info），例: RUST_LOG=site_supply=debug,slow_sql=warn
// - SITE_SUPPLY_LOG_FORMAT=json: 输出 JSON 行（便于采集）；其余值为文本
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "SITE_SUPPLY_LOG_FORMAT";

const DEFAULT_DIRECTIVE: &str = "info";

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// 初始化进程日志（重复调用时保持已有 subscriber）
///
/// ```no_run
/// site_supply::logging::init();
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let format = LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

/// 测试日志：debug 级别，输出走测试捕获
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Text);
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
    }
}
