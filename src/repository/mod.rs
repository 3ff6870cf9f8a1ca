// ==========================================
// 工地物资申领履约系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 所有仓储共用同一个共享连接；跨表写入经 run_in_transaction
// ==========================================

pub mod action_log_repo;
pub mod audit_repo;
pub mod codec;
pub mod dispatch_repo;
pub mod error;
pub mod material_repo;
pub mod project_repo;
pub mod request_repo;
pub mod transaction;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use audit_repo::StockAuditRepository;
pub use dispatch_repo::{DispatchRepository, DriverRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use material_repo::MaterialRepository;
pub use project_repo::ProjectRepository;
pub use request_repo::RequestRepository;
pub use transaction::run_in_transaction;
