// ==========================================
// 工地物资申领履约系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod audit;
pub mod dispatch;
pub mod material;
pub mod project;
pub mod request;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use audit::StockAudit;
pub use dispatch::{Dispatch, Driver, DriverLoad, NewManualDispatch};
pub use material::{Material, NewMaterial};
pub use project::Project;
pub use request::{MaterialRequest, Requester};
pub use types::{AssignmentPolicyKind, Decision, DispatchStatus, RequestStatus, MONEY_EPSILON};
