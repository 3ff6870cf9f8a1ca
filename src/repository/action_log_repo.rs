// ==========================================
// 工地物资申领履约系统 - 操作日志数据仓储
// ==========================================
// 红线: 所有写入必须记录
// ==========================================

mod core;
mod queries;


pub use core::ActionLogRepository;
