// ==========================================
// 工地物资申领履约系统 - 物资申领数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: material_requests 表的读写
// - 状态写入只允许从 pending 出发（条件更新）
// - delivery_assigned 只允许 0 -> 1
// ==========================================

use crate::db::SharedConnection;
use crate::domain::request::MaterialRequest;
use crate::domain::types::RequestStatus;
use crate::repository::codec::{fmt_ts, parse_enum, parse_opt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::sync::MutexGuard;

const SELECT_REQUEST: &str = r#"
    SELECT request_id, material_id, material_name, quantity_requested, total_cost,
           user_id, username, project_id, status, requested_at, responded_at,
           response_message, delivery_assigned
    FROM material_requests
"#;

struct RequestRow {
    request_id: String,
    material_id: String,
    material_name: Option<String>,
    quantity_requested: i64,
    total_cost: f64,
    user_id: Option<String>,
    username: Option<String>,
    project_id: String,
    status: String,
    requested_at: String,
    responded_at: Option<String>,
    response_message: Option<String>,
    delivery_assigned: bool,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            request_id: row.get(0)?,
            material_id: row.get(1)?,
            material_name: row.get(2)?,
            quantity_requested: row.get(3)?,
            total_cost: row.get(4)?,
            user_id: row.get(5)?,
            username: row.get(6)?,
            project_id: row.get(7)?,
            status: row.get(8)?,
            requested_at: row.get(9)?,
            responded_at: row.get(10)?,
            response_message: row.get(11)?,
            delivery_assigned: row.get::<_, i64>(12)? != 0,
        })
    }

    fn into_entity(self) -> RepositoryResult<MaterialRequest> {
        Ok(MaterialRequest {
            request_id: self.request_id,
            material_id: self.material_id,
            material_name: self.material_name.unwrap_or_default(),
            quantity_requested: self.quantity_requested,
            total_cost: self.total_cost,
            user_id: self.user_id.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            project_id: self.project_id,
            status: parse_enum("material_requests.status", &self.status, RequestStatus::parse)?,
            requested_at: parse_ts("material_requests.requested_at", &self.requested_at)?,
            responded_at: parse_opt_ts("material_requests.responded_at", self.responded_at)?,
            response_message: self.response_message,
            delivery_assigned: self.delivery_assigned,
        })
    }
}

fn collect(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> RepositoryResult<Vec<MaterialRequest>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, RequestRow::from_row)?;

    let mut requests = Vec::new();
    for row in rows {
        requests.push(row?.into_entity()?);
    }
    Ok(requests)
}

// ==========================================
// RequestRepository - 申领仓储
// ==========================================
pub struct RequestRepository {
    conn: SharedConnection,
}

impl RequestRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入申领
    pub fn insert(&self, request: &MaterialRequest) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, request)
    }

    pub fn insert_with(conn: &Connection, request: &MaterialRequest) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO material_requests (
                request_id, material_id, material_name, quantity_requested, total_cost,
                user_id, username, project_id, status, requested_at, responded_at,
                response_message, delivery_assigned
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                request.request_id,
                request.material_id,
                request.material_name,
                request.quantity_requested,
                request.total_cost,
                request.user_id,
                request.username,
                request.project_id,
                request.status.as_str(),
                fmt_ts(&request.requested_at),
                request.responded_at.as_ref().map(fmt_ts),
                request.response_message,
                request.delivery_assigned as i64,
            ],
        )?;
        Ok(())
    }

    /// 写入审批结果（仅当当前状态为 pending）
    ///
    /// # 返回
    /// - `Ok(true)`: 已写入
    /// - `Ok(false)`: 申领不存在或已处理，未做任何修改
    pub fn resolve_with(
        conn: &Connection,
        request_id: &str,
        status: RequestStatus,
        responded_at: &DateTime<Utc>,
        response_message: Option<&str>,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE material_requests
            SET status = ?2, responded_at = ?3, response_message = ?4
            WHERE request_id = ?1 AND status = 'pending'
            "#,
            params![request_id, status.as_str(), fmt_ts(responded_at), response_message],
        )?;
        Ok(rows == 1)
    }

    /// 标记已分配配送（仅当已批准且尚未标记）
    pub fn mark_delivery_assigned_with(conn: &Connection, request_id: &str) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE material_requests
            SET delivery_assigned = 1
            WHERE request_id = ?1 AND status = 'approved' AND delivery_assigned = 0
            "#,
            params![request_id],
        )?;
        Ok(rows == 1)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按主键查询
    pub fn find_by_id(&self, request_id: &str) -> RepositoryResult<Option<MaterialRequest>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, request_id)
    }

    pub fn find_by_id_with(conn: &Connection, request_id: &str) -> RepositoryResult<Option<MaterialRequest>> {
        let sql = format!("{} WHERE request_id = ?1", SELECT_REQUEST);
        let row = conn
            .query_row(&sql, params![request_id], RequestRow::from_row)
            .optional()?;
        row.map(RequestRow::into_entity).transpose()
    }

    /// 查询全部申领（按申领时间倒序）
    pub fn list_all(&self) -> RepositoryResult<Vec<MaterialRequest>> {
        let conn = self.get_conn()?;
        Self::list_all_with(&conn)
    }

    pub fn list_all_with(conn: &Connection) -> RepositoryResult<Vec<MaterialRequest>> {
        let sql = format!("{} ORDER BY requested_at DESC, request_id", SELECT_REQUEST);
        collect(conn, &sql, &[])
    }

    /// 按状态查询（按申领时间正序，先到先审）
    pub fn find_by_status(&self, status: RequestStatus) -> RepositoryResult<Vec<MaterialRequest>> {
        let conn = self.get_conn()?;
        Self::find_by_status_with(&conn, status)
    }

    pub fn find_by_status_with(
        conn: &Connection,
        status: RequestStatus,
    ) -> RepositoryResult<Vec<MaterialRequest>> {
        let sql = format!("{} WHERE status = ?1 ORDER BY requested_at, request_id", SELECT_REQUEST);
        collect(conn, &sql, &[&status.as_str()])
    }

    /// 按项目查询
    pub fn find_by_project(&self, project_id: &str) -> RepositoryResult<Vec<MaterialRequest>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE project_id = ?1 ORDER BY requested_at, request_id", SELECT_REQUEST);
        collect(&conn, &sql, &[&project_id])
    }

    /// 已批准申领ID（自动派车的期望集合）
    pub fn approved_ids_with(conn: &Connection) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT request_id FROM material_requests WHERE status = 'approved' ORDER BY requested_at, request_id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
