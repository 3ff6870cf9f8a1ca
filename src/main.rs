// ==========================================
// 工地物资申领履约系统 - 服务入口
// ==========================================
// 启动顺序: 日志 -> 数据库 -> AppState -> 全量对账 -> 派车监听 -> 等待 Ctrl-C
// ==========================================

use anyhow::{anyhow, Context, Result};
use site_supply::app::{get_default_db_path, AppState};
use site_supply::engine::{AnalyticsSnapshot, RequestFilter, SpendingAnalytics};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    site_supply::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", site_supply::APP_NAME);
    tracing::info!("系统版本: {}", site_supply::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;

    // 启动时补齐遗漏的派车单（上次运行期间批准但未派车的申领）
    let scheduler = state.scheduler.clone();
    let report = tokio::task::spawn_blocking(move || scheduler.reconcile_all())
        .await
        .context("对账任务执行失败")??;
    tracing::info!(
        approved = report.approved,
        created = report.created.len(),
        failed = report.failed.len(),
        "启动对账完成"
    );

    let conn = state.conn.clone();
    let snapshot = tokio::task::spawn_blocking(move || AnalyticsSnapshot::load(&conn))
        .await
        .context("读取账本失败")??;
    let summary = SpendingAnalytics::summarize(&snapshot.requests, &RequestFilter::all());
    tracing::info!(
        requests = summary.request_count,
        approved = summary.approved_count,
        pending = summary.pending_count,
        approved_spending = summary.approved_spending,
        "支出概况"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = state.dispatch_watcher().spawn(shutdown_rx);
    tracing::info!("派车监听已启动，按 Ctrl-C 退出");

    tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
    tracing::info!("收到退出信号，正在停止派车监听");
    let _ = shutdown_tx.send(true);

    let stats = watcher.await.context("派车监听异常退出")?;
    tracing::info!(
        received = stats.received,
        dispatched = stats.dispatched,
        duplicates = stats.duplicates,
        failed = stats.failed,
        "派车监听已停止"
    );
    Ok(())
}
