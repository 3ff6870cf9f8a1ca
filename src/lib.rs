// ==========================================
// 工地物资申领履约系统 - 核心库
// ==========================================
// 职责: 申领审批（库存扣减 + 预算记账）、自动派车、盘点对账、支出分析
// 技术栈: Rust + SQLite + tokio
// 红线: 库存不为负；预算支出不超上限；每个已批准申领恰好一张派车单
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 账本层 - 路径寻址、快照、变更流
pub mod store;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表）
pub mod db;

// 日志系统
pub mod logging;

// 性能观测
pub mod perf;

// 应用层 - 状态装配与命令
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AssignmentPolicyKind, Decision, DispatchStatus, RequestStatus};

// 领域实体
pub use domain::{
    ActionLog, ActionType, Dispatch, Driver, Material, MaterialRequest, NewManualDispatch,
    NewMaterial, Project, Requester, StockAudit,
};

// 引擎
pub use engine::{
    DispatchScheduler, DispatchWatcher, EngineError, EngineResult, FulfillmentCoordinator,
    RequestFilter, SpendingAnalytics, StockAuditEngine,
};

// 账本
pub use store::{ChangeFeed, Collection, LedgerPath, LedgerStore, Snapshot};

// 应用
pub use app::{get_default_db_path, AppState};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "工地物资申领履约系统";
