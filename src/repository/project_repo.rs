// ==========================================
// 工地物资申领履约系统 - 项目预算数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: projects 表的读写；支出累加使用条件更新（不得超出预算）
// ==========================================

use crate::db::SharedConnection;
use crate::domain::project::Project;
use crate::domain::types::MONEY_EPSILON;
use crate::repository::codec::{fmt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

const SELECT_PROJECT: &str = r#"
    SELECT project_id, name, budget, spent, created_at, updated_at
    FROM projects
"#;

fn map_project(row: &Row<'_>) -> rusqlite::Result<(String, String, f64, f64, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_project(raw: (String, String, f64, f64, String, String)) -> RepositoryResult<Project> {
    let (project_id, name, budget, spent, created_at, updated_at) = raw;
    Ok(Project {
        project_id,
        name,
        budget,
        spent,
        created_at: parse_ts("projects.created_at", &created_at)?,
        updated_at: parse_ts("projects.updated_at", &updated_at)?,
    })
}

// ==========================================
// ProjectRepository - 项目仓储
// ==========================================
pub struct ProjectRepository {
    conn: SharedConnection,
}

impl ProjectRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入项目
    pub fn insert(&self, project: &Project) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, project)
    }

    pub fn insert_with(conn: &Connection, project: &Project) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO projects (project_id, name, budget, spent, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                project.project_id,
                project.name,
                project.budget,
                project.spent,
                fmt_ts(&project.created_at),
                fmt_ts(&project.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 累加支出（条件更新：累加后不得超出预算）
    ///
    /// # 返回
    /// - `Ok(true)`: 已记账
    /// - `Ok(false)`: 项目不存在或剩余预算不足，未做任何修改
    pub fn add_spent_with(
        conn: &Connection,
        project_id: &str,
        amount: f64,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE projects
            SET spent = spent + ?2, updated_at = ?3
            WHERE project_id = ?1 AND spent + ?2 <= budget + ?4
            "#,
            params![project_id, amount, fmt_ts(now), MONEY_EPSILON],
        )?;
        Ok(rows == 1)
    }

    /// 追加预算
    pub fn add_budget_with(
        conn: &Connection,
        project_id: &str,
        amount: f64,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE projects SET budget = budget + ?2, updated_at = ?3 WHERE project_id = ?1",
            params![project_id, amount, fmt_ts(now)],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Project".to_string(),
                id: project_id.to_string(),
            });
        }
        Ok(())
    }

    /// 按主键查询
    pub fn find_by_id(&self, project_id: &str) -> RepositoryResult<Option<Project>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, project_id)
    }

    pub fn find_by_id_with(conn: &Connection, project_id: &str) -> RepositoryResult<Option<Project>> {
        let sql = format!("{} WHERE project_id = ?1", SELECT_PROJECT);
        let raw = conn
            .query_row(&sql, params![project_id], map_project)
            .optional()?;
        raw.map(into_project).transpose()
    }

    /// 查询全部项目
    pub fn list_all(&self) -> RepositoryResult<Vec<Project>> {
        let conn = self.get_conn()?;
        Self::list_all_with(&conn)
    }

    pub fn list_all_with(conn: &Connection) -> RepositoryResult<Vec<Project>> {
        let sql = format!("{} ORDER BY name, project_id", SELECT_PROJECT);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(into_project(row?)?);
        }
        Ok(projects)
    }
}
