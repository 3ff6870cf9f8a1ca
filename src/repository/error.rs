// ==========================================
// 工地物资申领履约系统 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: 仓储层只报告存储事实，业务规则错误由引擎层判定
// 约束类错误按 SQLite 扩展错误码归类（不依赖消息文本）
// ==========================================

use rusqlite::ffi;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 存储事实 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库读写失败: {0}")]
    DatabaseQueryError(String),

    // ===== 约束兜底（CHECK / UNIQUE / FOREIGN KEY） =====
    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("CHECK 约束违反: {0}")]
    CheckConstraintViolation(String),

    // ===== 存储适配边界：行值无法映射为领域字段 =====
    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, msg) => {
                let text = msg.clone().unwrap_or_else(|| err.to_string());
                match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        RepositoryError::UniqueConstraintViolation(text)
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepositoryError::ForeignKeyViolation(text),
                    ffi::SQLITE_CONSTRAINT_CHECK => RepositoryError::CheckConstraintViolation(text),
                    _ => RepositoryError::DatabaseQueryError(text),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            rusqlite::Error::FromSqlConversionFailure(column, _, cause) => {
                RepositoryError::FieldValueError {
                    field: format!("column#{}", column),
                    message: cause.to_string(),
                }
            }
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::FieldValueError {
            field: "json".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
