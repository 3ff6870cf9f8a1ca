// ==========================================
// 工地物资申领履约系统 - 账本存储门面
// ==========================================
// 职责:
// - 按路径读取单条记录（read_once），返回快照
// - 变更订阅（subscribe），由 ChangeFeed 分发
// 说明: 写入统一经引擎层事务完成，提交后再发布快照
// ==========================================

pub mod feed;
pub mod path;
pub mod snapshot;

pub use feed::{ChangeFeed, FeedRecvError, FeedSubscription, DEFAULT_FEED_CAPACITY};
pub use path::{Collection, LedgerPath};
pub use snapshot::{Snapshot, SnapshotError};

use crate::db::SharedConnection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{
    DispatchRepository, MaterialRepository, ProjectRepository, RequestRepository,
    StockAuditRepository,
};
use serde::Serialize;
use std::sync::Arc;

impl From<SnapshotError> for RepositoryError {
    fn from(err: SnapshotError) -> Self {
        RepositoryError::InternalError(err.to_string())
    }
}

/// 账本存储
pub struct LedgerStore {
    materials: MaterialRepository,
    projects: ProjectRepository,
    requests: RequestRepository,
    dispatches: DispatchRepository,
    audits: StockAuditRepository,
    feed: Arc<ChangeFeed>,
}

impl LedgerStore {
    pub fn new(conn: SharedConnection, feed: Arc<ChangeFeed>) -> Self {
        Self {
            materials: MaterialRepository::new(conn.clone()),
            projects: ProjectRepository::new(conn.clone()),
            requests: RequestRepository::new(conn.clone()),
            dispatches: DispatchRepository::new(conn.clone()),
            audits: StockAuditRepository::new(conn),
            feed,
        }
    }

    /// 读取某路径的当前值
    ///
    /// 记录不存在时返回 `Snapshot::absent`（不视为错误）
    pub fn read_once(&self, path: &LedgerPath) -> RepositoryResult<Snapshot> {
        let id = path.id.as_str();
        match path.collection {
            Collection::Materials => snapshot_of(path, self.materials.find_by_id(id)?),
            Collection::Projects => snapshot_of(path, self.projects.find_by_id(id)?),
            Collection::MaterialRequests => snapshot_of(path, self.requests.find_by_id(id)?),
            Collection::Dispatches => snapshot_of(path, self.dispatches.find_by_id(id)?),
            Collection::StockAudits => snapshot_of(path, self.audits.find_by_id(id)?),
        }
    }

    /// 订阅变更（None = 全部集合）
    pub fn subscribe(&self, collection: Option<Collection>) -> FeedSubscription {
        self.feed.subscribe(collection)
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        self.feed.clone()
    }
}

fn snapshot_of<T: Serialize>(path: &LedgerPath, entity: Option<T>) -> RepositoryResult<Snapshot> {
    match entity {
        Some(entity) => Ok(Snapshot::of(path.clone(), &entity)?),
        None => Ok(Snapshot::absent(path.clone())),
    }
}
