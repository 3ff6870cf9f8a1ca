// ==========================================
// 工地物资申领履约系统 - 引擎层
// ==========================================
// 职责: 业务规则引擎，不拼 SQL
// 红线: 所有失败带具体数值；所有成功结果说明变化量
// 红线: 写入在事务内完成，提交后才发布变更快照
// ==========================================

pub mod analytics;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod export;
pub mod fulfillment;
pub mod stock_audit;

#[cfg(test)]
pub(crate) mod test_support;

// 重导出核心引擎
pub use analytics::{
    AnalyticsSnapshot, CategorySpending, ProjectSpending, RequestFilter, SpendingAnalytics,
    SpendingReport, SpendingSummary, WastageRow,
};
pub use dispatch::{
    AssignmentPolicy, DispatchOutcome, DispatchScheduler, DispatchWatcher, ReconcileAction,
    ReconcileReport, WatcherStats,
};
pub use error::{EngineError, EngineResult};
pub use events::{ChangePublisher, NoOpPublisher, OptionalPublisher};
pub use export::{ExportError, RequestExportRow, WastageExportRow};
pub use fulfillment::{
    ApprovalOutcome, BudgetTopUpOutcome, FulfillmentCoordinator, RejectionOutcome,
    ResponseOutcome, RestockOutcome,
};
pub use stock_audit::{AuditOutcome, StockAuditEngine};
