// ==========================================
// 应用命令
// ==========================================
// 约定: 输入为原始字符串/数值，输出为 JSON 字符串
// 失败: ErrorResponse { code, message, details } 的 JSON
// ==========================================

mod common;

pub mod analytics;
pub mod audit;
pub mod dispatch;
pub mod request;

pub use analytics::*;
pub use audit::*;
pub use common::ErrorResponse;
pub use dispatch::*;
pub use request::*;
