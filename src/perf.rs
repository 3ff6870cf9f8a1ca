// ==========================================
// 性能观测: SQL 计数 + 慢 SQL 日志
// ==========================================
// 开关:
// - Debug 构建默认开启；Release 默认关闭
// - SITE_SUPPLY_PERF_SQL=1 强制开启
// - SITE_SUPPLY_SLOW_SQL_MS=50 慢 SQL 阈值（毫秒）
// 计数为线程内统计，只在 PerfGuard 存活期间累加
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const PERF_SQL_ENV: &str = "SITE_SUPPLY_PERF_SQL";
pub const SLOW_SQL_MS_ENV: &str = "SITE_SUPPLY_SLOW_SQL_MS";

static PERF_SQL_ENABLED: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static GUARD_DEPTH: Cell<u32> = const { Cell::new(0) };
    static SQL_TOTAL: Cell<u64> = const { Cell::new(0) };
    static SLOW_SQL_TOTAL: Cell<u64> = const { Cell::new(0) };
}

// ==========================================
// PerfSettings - 观测开关
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub enabled: bool,
    pub slow_sql_ms: u64,
}

impl PerfSettings {
    /// 由原始环境变量值解析（None = 未设置）
    pub fn from_vars(perf_sql: Option<&str>, slow_ms: Option<&str>) -> Self {
        let enabled = perf_sql.map_or(cfg!(debug_assertions), is_truthy);
        let default_ms = if cfg!(debug_assertions) { 50 } else { 200 };
        let slow_sql_ms = slow_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(default_ms);
        Self {
            enabled,
            slow_sql_ms,
        }
    }

    pub fn from_env() -> Self {
        let perf_sql = std::env::var(PERF_SQL_ENV).ok();
        let slow_ms = std::env::var(SLOW_SQL_MS_ENV).ok();
        Self::from_vars(perf_sql.as_deref(), slow_ms.as_deref())
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// 折叠空白并按字符截断（日志用）
fn compact_sql(sql: &str, max_chars: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars).collect();
    format!("{}…", head)
}

/// 为连接挂载 trace/profile 回调（设置取自环境变量）
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let settings = PerfSettings::from_env();
    PERF_SQL_ENABLED.store(settings.enabled, Ordering::Relaxed);
    SLOW_SQL_THRESHOLD_MS.store(settings.slow_sql_ms, Ordering::Relaxed);

    if settings.enabled {
        conn.trace(Some(on_sql_trace));
        conn.profile(Some(on_sql_profile));
    } else {
        conn.trace(None);
        conn.profile(None);
    }
}

fn guard_active() -> bool {
    GUARD_DEPTH.with(|d| d.get() > 0)
}

fn on_sql_trace(_sql: &str) {
    if PERF_SQL_ENABLED.load(Ordering::Relaxed) && guard_active() {
        SQL_TOTAL.with(|c| c.set(c.get().saturating_add(1)));
    }
}

fn on_sql_profile(sql: &str, duration: Duration) {
    if !PERF_SQL_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let threshold = SLOW_SQL_THRESHOLD_MS.load(Ordering::Relaxed);
    let ms = duration.as_millis() as u64;
    if threshold == 0 || ms < threshold {
        return;
    }
    tracing::warn!(
        target: "slow_sql",
        duration_ms = ms,
        sql = %compact_sql(sql, 300),
        "慢 SQL"
    );
    if guard_active() {
        SLOW_SQL_TOTAL.with(|c| c.set(c.get().saturating_add(1)));
    }
}

// ==========================================
// PerfGuard - 命令级统计
// ==========================================

/// 析构时输出耗时、SQL 条数与慢 SQL 条数
///
/// ```ignore
/// let _perf = site_supply::perf::PerfGuard::new("cmd.respond_to_request");
/// ```
pub struct PerfGuard {
    op: &'static str,
    started: Instant,
    sql_base: u64,
    slow_base: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_add(1)));
        Self {
            op,
            started: Instant::now(),
            sql_base: SQL_TOTAL.with(|c| c.get()),
            slow_base: SLOW_SQL_TOTAL.with(|c| c.get()),
        }
    }

    /// 当前为止本 guard 范围内的 (SQL 条数, 慢 SQL 条数)
    pub fn counts(&self) -> (u64, u64) {
        (
            SQL_TOTAL.with(|c| c.get()).saturating_sub(self.sql_base),
            SLOW_SQL_TOTAL.with(|c| c.get()).saturating_sub(self.slow_base),
        )
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let (sql_count, slow_sql_count) = self.counts();
        tracing::info!(
            target: "perf",
            op = self.op,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            sql_count,
            slow_sql_count,
            "命令完成"
        );
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
