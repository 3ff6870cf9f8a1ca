// ==========================================
// 工地物资申领履约系统 - 自动派车订阅循环
// ==========================================
// 职责: 订阅 material_requests 变更，为“已批准且未分配配送”的申领触发对账
// 约定:
// - 快照至少投递一次，对账本身幂等
// - 单条快照处理失败只记录告警，循环继续
// - 订阅落后时做一次全量对账补齐
// - 订阅流关闭或收到停止信号时退出
// ==========================================

use super::scheduler::{DispatchScheduler, ReconcileAction};
use crate::domain::request::MaterialRequest;
use crate::store::feed::{FeedRecvError, FeedSubscription};
use crate::store::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 订阅循环统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    pub received: u64,
    pub dispatched: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub full_passes: u64,
}

// ==========================================
// DispatchWatcher - 自动派车订阅循环
// ==========================================
pub struct DispatchWatcher {
    scheduler: Arc<DispatchScheduler>,
    subscription: FeedSubscription,
    stats: WatcherStats,
}

impl DispatchWatcher {
    /// subscription 应为 material_requests 集合的订阅
    pub fn new(scheduler: Arc<DispatchScheduler>, subscription: FeedSubscription) -> Self {
        Self {
            scheduler,
            subscription,
            stats: WatcherStats::default(),
        }
    }

    /// 在 tokio 运行时中启动
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<WatcherStats> {
        tokio::spawn(self.run(shutdown))
    }

    /// 运行订阅循环，直到订阅关闭或停止信号
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WatcherStats {
        tracing::info!("自动派车订阅循环已启动");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = self.subscription.recv() => match next {
                    Ok(snapshot) => self.handle_snapshot(snapshot).await,
                    Err(FeedRecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "订阅落后，执行全量对账");
                        self.full_reconcile().await;
                    }
                    Err(FeedRecvError::Closed) => {
                        tracing::info!("订阅流已关闭");
                        break;
                    }
                },
            }
        }
        tracing::info!(
            received = self.stats.received,
            dispatched = self.stats.dispatched,
            failed = self.stats.failed,
            "自动派车订阅循环已退出"
        );
        self.stats
    }

    async fn handle_snapshot(&mut self, snapshot: Snapshot) {
        self.stats.received += 1;

        let request = match snapshot.decode::<MaterialRequest>() {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(path = %snapshot.path, "申领快照为空，跳过");
                return;
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(error = %e, "申领快照解码失败，跳过");
                return;
            }
        };

        if !request.awaits_dispatch() {
            tracing::debug!(request_id = %request.request_id, status = %request.status, "无需派车");
            return;
        }

        let scheduler = self.scheduler.clone();
        let request_id = request.request_id.clone();
        let joined =
            tokio::task::spawn_blocking(move || scheduler.reconcile_request(&request_id)).await;

        match joined {
            Ok(Ok(ReconcileAction::Created { dispatch })) => {
                self.stats.dispatched += 1;
                tracing::debug!(dispatch_id = %dispatch.dispatch_id, "订阅触发自动派车");
            }
            Ok(Ok(_)) => self.stats.duplicates += 1,
            Ok(Err(e)) => {
                self.stats.failed += 1;
                tracing::warn!(request_id = %request.request_id, error = %e, "订阅触发自动派车失败");
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(request_id = %request.request_id, error = %e, "对账任务异常退出");
            }
        }
    }

    async fn full_reconcile(&mut self) {
        self.stats.full_passes += 1;
        let scheduler = self.scheduler.clone();
        match tokio::task::spawn_blocking(move || scheduler.reconcile_all()).await {
            Ok(Ok(report)) => {
                self.stats.dispatched += report.created.len() as u64;
                self.stats.failed += report.failed.len() as u64;
            }
            Ok(Err(e)) => {
                self.stats.failed += 1;
                tracing::warn!(error = %e, "全量对账失败");
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(error = %e, "全量对账任务异常退出");
            }
        }
    }
}
