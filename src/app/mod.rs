// ==========================================
// 工地物资申领履约系统 - 应用层
// ==========================================
// 职责: 组装共享连接/引擎/变更流，对外暴露命令函数
// 命令约定: 成功返回 JSON 字符串；失败返回 ErrorResponse JSON
// ==========================================

pub mod commands;
pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
