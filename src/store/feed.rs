// ==========================================
// 工地物资申领履约系统 - 变更订阅流
// ==========================================
// 职责: 基于 tokio broadcast 的快照分发
// 语义:
// - 同一路径按写入顺序送达；不同路径之间无顺序保证
// - 至少一次：同一快照可能被重复发布，订阅方必须幂等
// - 订阅方落后（Lagged）时返回 FeedRecvError::Lagged，由订阅方做全量对账
// ==========================================

use crate::engine::events::ChangePublisher;
use crate::store::path::Collection;
use crate::store::snapshot::Snapshot;
use std::error::Error;
use thiserror::Error as ThisError;
use tokio::sync::broadcast;

/// 默认缓冲区容量
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum FeedRecvError {
    #[error("订阅落后，丢失 {0} 条快照")]
    Lagged(u64),

    #[error("订阅流已关闭")]
    Closed,
}

/// 变更订阅流
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Snapshot>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅（可按集合过滤）
    pub fn subscribe(&self, collection: Option<Collection>) -> FeedSubscription {
        FeedSubscription {
            receiver: self.sender.subscribe(),
            collection,
        }
    }

    /// 发布快照，返回收到的订阅者数量（无订阅者时为 0）
    pub fn publish_snapshot(&self, snapshot: Snapshot) -> usize {
        self.sender.send(snapshot).unwrap_or(0)
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl ChangePublisher for ChangeFeed {
    fn publish(&self, snapshot: Snapshot) -> Result<usize, Box<dyn Error + Send + Sync>> {
        // 无订阅者不视为错误
        Ok(self.publish_snapshot(snapshot))
    }
}

/// 单个订阅
pub struct FeedSubscription {
    receiver: broadcast::Receiver<Snapshot>,
    collection: Option<Collection>,
}

impl FeedSubscription {
    /// 接收下一条匹配的快照
    pub async fn recv(&mut self) -> Result<Snapshot, FeedRecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => {
                    if self.matches(&snapshot) {
                        return Ok(snapshot);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(FeedRecvError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(FeedRecvError::Closed),
            }
        }
    }

    /// 非阻塞接收（无可用快照时返回 None）
    pub fn try_recv(&mut self) -> Option<Result<Snapshot, FeedRecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => {
                    if self.matches(&snapshot) {
                        return Some(Ok(snapshot));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(FeedRecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(FeedRecvError::Closed)),
            }
        }
    }

    fn matches(&self, snapshot: &Snapshot) -> bool {
        self.collection
            .map(|c| c == snapshot.path.collection)
            .unwrap_or(true)
    }
}
