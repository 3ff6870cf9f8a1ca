// ==========================================
// 工地物资申领履约系统 - 引擎层错误类型
// ==========================================
// 职责: 业务规则失败与存储失败分离
// - 业务规则失败: 调整输入后重试（减少数量、补货、追加预算）
// - StoreIo: 基础设施瞬时故障，可原样重试
// 红线: 每条失败信息都带具体数值（请求量 vs 可用量）
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // ==========================================
    // 输入校验（写入前拒绝）
    // ==========================================
    #[error("输入校验失败: {0}")]
    Validation(String),

    // ==========================================
    // 业务规则
    // ==========================================
    #[error("库存不足: material_id={material_id}, 可用={available}, 请求={requested}")]
    InsufficientStock {
        material_id: String,
        available: i64,
        requested: i64,
    },

    #[error("预算超支: project_id={project_id}, 剩余预算={available:.2}, 本次费用={requested:.2}")]
    BudgetExceeded {
        project_id: String,
        available: f64,
        requested: f64,
    },

    #[error("记录不存在: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    #[error("申领已处理: request_id={request_id}, 当前状态={status}")]
    AlreadyResolved { request_id: String, status: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("没有可用司机")]
    NoDriverAvailable,

    // ==========================================
    // 基础设施
    // ==========================================
    #[error("存储读写失败: {0}")]
    StoreIo(String),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 是否可原样重试（不修改输入）
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreIo(_) | EngineError::NoDriverAvailable)
    }

    /// 稳定错误码（供应用层返回）
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            EngineError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::AlreadyResolved { .. } => "ALREADY_RESOLVED",
            EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::NoDriverAvailable => "NO_DRIVER_AVAILABLE",
            EngineError::StoreIo(_) => "STORE_IO_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// 约束条件违反说明输入未通过校验；其余均视为存储故障
// ==========================================
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::CheckConstraintViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg)
            | RepositoryError::UniqueConstraintViolation(msg) => EngineError::Validation(msg),
            other => EngineError::StoreIo(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
