// ==========================================
// 工地物资申领履约系统 - 事务管理
// ==========================================
// 职责: 单写者串行化点
// - 持有共享连接互斥锁 + IMMEDIATE 事务
// - 闭包返回 Err 时回滚（Transaction drop 即回滚），所有记录保持原样
// ==========================================

use crate::db::SharedConnection;
use crate::repository::error::RepositoryError;
use rusqlite::{Transaction, TransactionBehavior};

/// 在单个事务内执行一组读写
///
/// # 参数
/// - `conn`: 共享连接
/// - `f`: 事务体；可返回任意可由 RepositoryError 转换的错误类型
///
/// # 返回
/// - `Ok(T)`: 事务已提交
/// - `Err(E)`: 事务已回滚
pub fn run_in_transaction<T, E, F>(conn: &SharedConnection, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = conn
        .lock()
        .map_err(|e| E::from(RepositoryError::LockError(e.to_string())))?;

    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| E::from(RepositoryError::DatabaseTransactionError(e.to_string())))?;

    let value = f(&tx)?;

    tx.commit()
        .map_err(|e| E::from(RepositoryError::DatabaseTransactionError(e.to_string())))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::repository::error::RepositoryResult;

    fn count(conn: &SharedConnection) -> i64 {
        let guard = conn.lock().unwrap();
        guard
            .query_row("SELECT COUNT(*) FROM config_kv", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_on_ok() {
        let conn = open_in_memory().unwrap();
        let result: RepositoryResult<()> = run_in_transaction(&conn, |tx| {
            tx.execute("INSERT INTO config_kv (key, value) VALUES ('a', '1')", [])?;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_rollback_on_err() {
        let conn = open_in_memory().unwrap();
        let result: RepositoryResult<()> = run_in_transaction(&conn, |tx| {
            tx.execute("INSERT INTO config_kv (key, value) VALUES ('a', '1')", [])?;
            Err(RepositoryError::InternalError("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
    }
}
