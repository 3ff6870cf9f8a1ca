// ==========================================
// 工地物资申领履约系统 - 应用状态
// ==========================================
// 职责: 管理应用级共享资源（连接、变更流、引擎实例）
// 约束: 所有引擎共用同一个 SharedConnection（单写者串行化点）
// ==========================================

use std::sync::Arc;

use crate::config::ConfigManager;
use crate::db::{self, SharedConnection};
use crate::engine::dispatch::DispatchWatcher;
use crate::engine::{
    ChangePublisher, DispatchScheduler, FulfillmentCoordinator, OptionalPublisher,
    StockAuditEngine,
};
use crate::repository::ActionLogRepository;
use crate::store::{ChangeFeed, Collection, LedgerStore, DEFAULT_FEED_CAPACITY};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "SITE_SUPPLY_DB";

/// 应用状态
///
/// 进程内唯一；命令函数借用它，后台任务克隆其中的 Arc
pub struct AppState {
    /// 数据库路径（内存库为 ":memory:"）
    pub db_path: String,

    pub conn: SharedConnection,

    /// 提交后变更快照的广播流
    pub feed: Arc<ChangeFeed>,

    /// 单条读取 + 订阅入口
    pub store: Arc<LedgerStore>,

    pub config_manager: Arc<ConfigManager>,

    /// 申领 / 物资 / 项目
    pub coordinator: Arc<FulfillmentCoordinator>,

    /// 自动派车 / 手工派车 / 司机
    pub scheduler: Arc<DispatchScheduler>,

    /// 盘点
    pub audit_engine: Arc<StockAuditEngine>,

    /// 操作日志（审计追踪查询）
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AppState {
    /// 打开（或创建）数据库文件并组装全部组件
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);
        let conn = db::open_shared(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        Self::from_connection(db_path, conn)
    }

    /// 内存数据库（演示 / 测试）
    pub fn in_memory() -> Result<Self, String> {
        let conn = db::open_in_memory().map_err(|e| format!("无法创建内存数据库: {}", e))?;
        Self::from_connection(":memory:".to_string(), conn)
    }

    /// 基于已建表的共享连接组装
    pub fn from_connection(db_path: String, conn: SharedConnection) -> Result<Self, String> {
        let feed = Arc::new(ChangeFeed::new(DEFAULT_FEED_CAPACITY));
        let publisher = OptionalPublisher::with_publisher(feed.clone() as Arc<dyn ChangePublisher>);

        let store = Arc::new(LedgerStore::new(conn.clone(), feed.clone()));
        let config_manager = Arc::new(ConfigManager::new(conn.clone()));

        let coordinator = Arc::new(FulfillmentCoordinator::new(conn.clone(), publisher.clone()));
        let scheduler = Arc::new(
            DispatchScheduler::new(conn.clone(), config_manager.clone(), publisher.clone())
                .map_err(|e| format!("无法创建DispatchScheduler: {}", e))?,
        );
        let audit_engine = Arc::new(StockAuditEngine::new(conn.clone(), publisher));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn.clone()));

        tracing::info!(db_path = %db_path, "AppState初始化完成");

        Ok(Self {
            db_path,
            conn,
            feed,
            store,
            config_manager,
            coordinator,
            scheduler,
            audit_engine,
            action_log_repo,
        })
    }

    /// 创建订阅申领集合的派车监听器（未启动）
    pub fn dispatch_watcher(&self) -> DispatchWatcher {
        DispatchWatcher::new(
            self.scheduler.clone(),
            self.store.subscribe(Some(Collection::MaterialRequests)),
        )
    }
}

/// 获取默认数据库路径
///
/// 优先级: SITE_SUPPLY_DB > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./site_supply.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发构建使用独立目录，避免污染正式账本
        #[cfg(debug_assertions)]
        let dir = data_dir.join("site-supply-dev");
        #[cfg(not(debug_assertions))]
        let dir = data_dir.join("site-supply");

        match std::fs::create_dir_all(&dir) {
            Ok(()) => path = dir.join("site_supply.db"),
            Err(e) => tracing::warn!("无法创建数据目录 {}: {}，使用当前目录", dir.display(), e),
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_in_memory_state_wires_feed() {
        let state = AppState::in_memory().unwrap();
        assert_eq!(state.db_path, ":memory:");
        assert_eq!(state.feed.subscriber_count(), 0);

        let _watcher = state.dispatch_watcher();
        assert_eq!(state.feed.subscriber_count(), 1);
    }
}
