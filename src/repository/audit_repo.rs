// ==========================================
// 工地物资申领履约系统 - 盘点记录数据仓储
// ==========================================
// 红线: 只追加（无 UPDATE / DELETE 接口）
// ==========================================

use crate::db::SharedConnection;
use crate::domain::audit::StockAudit;
use crate::repository::codec::{fmt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row, ToSql};
use std::sync::MutexGuard;

const SELECT_AUDIT: &str = r#"
    SELECT audit_id, material_id, material_name, recorded_quantity,
           actual_quantity, audited_at, audited_by
    FROM stock_audits
"#;

type AuditRaw = (String, String, Option<String>, i64, i64, String, String);

fn map_audit(row: &Row<'_>) -> rusqlite::Result<AuditRaw> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_audit(raw: AuditRaw) -> RepositoryResult<StockAudit> {
    let (audit_id, material_id, material_name, recorded_quantity, actual_quantity, audited_at, audited_by) = raw;
    Ok(StockAudit {
        audit_id,
        material_id,
        material_name: material_name.unwrap_or_default(),
        recorded_quantity,
        actual_quantity,
        audited_at: parse_ts("stock_audits.audited_at", &audited_at)?,
        audited_by,
    })
}

fn collect(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> RepositoryResult<Vec<StockAudit>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, map_audit)?;
    let mut audits = Vec::new();
    for row in rows {
        audits.push(into_audit(row?)?);
    }
    Ok(audits)
}

// ==========================================
// StockAuditRepository - 盘点记录仓储
// ==========================================
pub struct StockAuditRepository {
    conn: SharedConnection,
}

impl StockAuditRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加盘点记录
    pub fn append_with(conn: &Connection, audit: &StockAudit) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO stock_audits (
                audit_id, material_id, material_name, recorded_quantity,
                actual_quantity, audited_at, audited_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                audit.audit_id,
                audit.material_id,
                audit.material_name,
                audit.recorded_quantity,
                audit.actual_quantity,
                fmt_ts(&audit.audited_at),
                audit.audited_by,
            ],
        )?;
        Ok(())
    }

    /// 全部盘点记录（时间正序）
    pub fn list_all(&self) -> RepositoryResult<Vec<StockAudit>> {
        let conn = self.get_conn()?;
        Self::list_all_with(&conn)
    }

    pub fn list_all_with(conn: &Connection) -> RepositoryResult<Vec<StockAudit>> {
        let sql = format!("{} ORDER BY audited_at, audit_id", SELECT_AUDIT);
        collect(conn, &sql, &[])
    }

    /// 按主键查询
    pub fn find_by_id(&self, audit_id: &str) -> RepositoryResult<Option<StockAudit>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE audit_id = ?1", SELECT_AUDIT);
        Ok(collect(&conn, &sql, &[&audit_id])?.into_iter().next())
    }

    /// 某物资的盘点时间序列（时间正序）
    pub fn find_by_material(&self, material_id: &str) -> RepositoryResult<Vec<StockAudit>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE material_id = ?1 ORDER BY audited_at, audit_id", SELECT_AUDIT);
        collect(&conn, &sql, &[&material_id])
    }
}
