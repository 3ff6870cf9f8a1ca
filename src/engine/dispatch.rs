// ==========================================
// 工地物资申领履约系统 - 派车引擎
// ==========================================
// 子模块:
// - assignment: 司机分配策略
// - scheduler: 自动派车对账 / 手工派车 / 状态机
// - watcher: 变更订阅循环
// ==========================================

pub mod assignment;
pub mod scheduler;
pub mod watcher;


pub use assignment::{policy_for, AssignmentPolicy, FirstAvailable, LeastLoaded, RoundRobin};
pub use scheduler::{
    DispatchOutcome, DispatchScheduler, ReconcileAction, ReconcileFailure, ReconcileReport,
    DRIVERS_ENTITY, SYSTEM_ACTOR,
};
pub use watcher::{DispatchWatcher, WatcherStats};
