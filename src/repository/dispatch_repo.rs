// ==========================================
// 工地物资申领履约系统 - 派车与司机数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: dispatches / drivers 表的读写
// - 自动派车插入使用 INSERT OR IGNORE（dispatch_id 主键 = 幂等键）
// ==========================================

use crate::db::SharedConnection;
use crate::domain::dispatch::{Dispatch, Driver, DriverLoad};
use crate::domain::types::DispatchStatus;
use crate::repository::codec::{fmt_ts, parse_enum, parse_opt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashSet;
use std::sync::MutexGuard;

const SELECT_DISPATCH: &str = r#"
    SELECT dispatch_id, request_id, material_id, material_name, quantity,
           from_site, to_site, driver_id, driver_name, vehicle_number,
           status, dispatch_time, eta, delivery_time
    FROM dispatches
"#;

struct DispatchRow {
    dispatch_id: String,
    request_id: Option<String>,
    material_id: String,
    material_name: Option<String>,
    quantity: i64,
    from_site: Option<String>,
    to_site: Option<String>,
    driver_id: String,
    driver_name: Option<String>,
    vehicle_number: Option<String>,
    status: String,
    dispatch_time: String,
    eta: String,
    delivery_time: Option<String>,
}

impl DispatchRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            dispatch_id: row.get(0)?,
            request_id: row.get(1)?,
            material_id: row.get(2)?,
            material_name: row.get(3)?,
            quantity: row.get(4)?,
            from_site: row.get(5)?,
            to_site: row.get(6)?,
            driver_id: row.get(7)?,
            driver_name: row.get(8)?,
            vehicle_number: row.get(9)?,
            status: row.get(10)?,
            dispatch_time: row.get(11)?,
            eta: row.get(12)?,
            delivery_time: row.get(13)?,
        })
    }

    fn into_entity(self) -> RepositoryResult<Dispatch> {
        Ok(Dispatch {
            dispatch_id: self.dispatch_id,
            request_id: self.request_id,
            material_id: self.material_id,
            material_name: self.material_name.unwrap_or_default(),
            quantity: self.quantity,
            from_site: self.from_site.unwrap_or_default(),
            to_site: self.to_site.unwrap_or_default(),
            driver_id: self.driver_id,
            driver_name: self.driver_name.unwrap_or_default(),
            vehicle_number: self.vehicle_number.unwrap_or_default(),
            status: parse_enum("dispatches.status", &self.status, DispatchStatus::parse)?,
            dispatch_time: parse_ts("dispatches.dispatch_time", &self.dispatch_time)?,
            eta: parse_ts("dispatches.eta", &self.eta)?,
            delivery_time: parse_opt_ts("dispatches.delivery_time", self.delivery_time)?,
        })
    }
}

fn collect(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> RepositoryResult<Vec<Dispatch>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, DispatchRow::from_row)?;

    let mut dispatches = Vec::new();
    for row in rows {
        dispatches.push(row?.into_entity()?);
    }
    Ok(dispatches)
}

// ==========================================
// DispatchRepository - 派车仓储
// ==========================================
pub struct DispatchRepository {
    conn: SharedConnection,
}

impl DispatchRepository {
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

    /// 插入派车单（已存在同ID时不做任何修改）
    ///
    /// # 返回
    /// - `Ok(true)`: 新建成功
    /// - `Ok(false)`: 已存在（重复投递）
    pub fn insert_if_absent_with(conn: &Connection, dispatch: &Dispatch) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO dispatches (
                dispatch_id, request_id, material_id, material_name, quantity,
                from_site, to_site, driver_id, driver_name, vehicle_number,
                status, dispatch_time, eta, delivery_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                dispatch.dispatch_id,
                dispatch.request_id,
                dispatch.material_id,
                dispatch.material_name,
                dispatch.quantity,
                dispatch.from_site,
                dispatch.to_site,
                dispatch.driver_id,
                dispatch.driver_name,
                dispatch.vehicle_number,
                dispatch.status.as_str(),
                fmt_ts(&dispatch.dispatch_time),
                fmt_ts(&dispatch.eta),
                dispatch.delivery_time.as_ref().map(fmt_ts),
            ],
        )?;
        Ok(rows == 1)
    }

    /// 状态变更（条件更新：仅当当前状态等于 `from`）
    pub fn transition_status_with(
        conn: &Connection,
        dispatch_id: &str,
        from: DispatchStatus,
        to: DispatchStatus,
        delivery_time: Option<&DateTime<Utc>>,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE dispatches
            SET status = ?3, delivery_time = COALESCE(?4, delivery_time)
            WHERE dispatch_id = ?1 AND status = ?2
            "#,
            params![dispatch_id, from.as_str(), to.as_str(), delivery_time.map(fmt_ts)],
        )?;
        Ok(rows == 1)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn exists_with(conn: &Connection, dispatch_id: &str) -> RepositoryResult<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM dispatches WHERE dispatch_id = ?1",
                params![dispatch_id],
                |_row| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn find_by_id(&self, dispatch_id: &str) -> RepositoryResult<Option<Dispatch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, dispatch_id)
    }

    pub fn find_by_id_with(conn: &Connection, dispatch_id: &str) -> RepositoryResult<Option<Dispatch>> {
        let sql = format!("{} WHERE dispatch_id = ?1", SELECT_DISPATCH);
        let row = conn
            .query_row(&sql, params![dispatch_id], DispatchRow::from_row)
            .optional()?;
        row.map(DispatchRow::into_entity).transpose()
    }

    /// 查询全部派车单（发车时间倒序）
    pub fn list_all(&self) -> RepositoryResult<Vec<Dispatch>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY dispatch_time DESC, dispatch_id", SELECT_DISPATCH);
        collect(&conn, &sql, &[])
    }

    pub fn find_by_status(&self, status: DispatchStatus) -> RepositoryResult<Vec<Dispatch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = ?1 ORDER BY dispatch_time DESC, dispatch_id",
            SELECT_DISPATCH
        );
        collect(&conn, &sql, &[&status.as_str()])
    }

    /// 关联某申领的派车单数量（不变量检查用）
    pub fn count_by_request(&self, request_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM dispatches WHERE request_id = ?1",
            params![request_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 已存在的自动派车单ID集合（自动派车的实际集合）
    pub fn auto_dispatch_ids_with(conn: &Connection) -> RepositoryResult<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT dispatch_id FROM dispatches WHERE request_id IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }
}

// ==========================================
// DriverRepository - 司机名册仓储
// ==========================================
pub struct DriverRepository {
    conn: SharedConnection,
}

fn map_driver(row: &Row<'_>) -> rusqlite::Result<(String, String, String, bool, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i64>(3)? != 0,
        row.get(4)?,
    ))
}

fn into_driver(raw: (String, String, String, bool, String)) -> RepositoryResult<Driver> {
    let (driver_id, name, vehicle_number, active, created_at) = raw;
    Ok(Driver {
        driver_id,
        name,
        vehicle_number,
        active,
        created_at: parse_ts("drivers.created_at", &created_at)?,
    })
}

impl DriverRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_with(conn: &Connection, driver: &Driver) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO drivers (driver_id, name, vehicle_number, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                driver.driver_id,
                driver.name,
                driver.vehicle_number,
                driver.active as i64,
                fmt_ts(&driver.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn set_active_with(conn: &Connection, driver_id: &str, active: bool) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE drivers SET active = ?2 WHERE driver_id = ?1",
            params![driver_id, active as i64],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Driver".to_string(),
                id: driver_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn find_by_id_with(conn: &Connection, driver_id: &str) -> RepositoryResult<Option<Driver>> {
        let raw = conn
            .query_row(
                "SELECT driver_id, name, vehicle_number, active, created_at FROM drivers WHERE driver_id = ?1",
                params![driver_id],
                map_driver,
            )
            .optional()?;
        raw.map(into_driver).transpose()
    }

    /// 司机名册（登记顺序）
    pub fn list_all(&self) -> RepositoryResult<Vec<Driver>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT driver_id, name, vehicle_number, active, created_at FROM drivers ORDER BY created_at, driver_id",
        )?;
        let rows = stmt.query_map([], map_driver)?;
        let mut drivers = Vec::new();
        for row in rows {
            drivers.push(into_driver(row?)?);
        }
        Ok(drivers)
    }

    /// 在岗司机及其运输中派车单数（登记顺序）
    pub fn active_loads_with(conn: &Connection) -> RepositoryResult<Vec<DriverLoad>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT d.driver_id, d.name, d.vehicle_number, d.active, d.created_at,
                   (SELECT COUNT(*) FROM dispatches x
                     WHERE x.driver_id = d.driver_id AND x.status = 'in-transit') AS in_transit
            FROM drivers d
            WHERE d.active = 1
            ORDER BY d.created_at, d.driver_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| Ok((map_driver(row)?, row.get::<_, i64>(5)?)))?;

        let mut loads = Vec::new();
        for row in rows {
            let (raw, in_transit) = row?;
            loads.push(DriverLoad {
                driver: into_driver(raw)?,
                in_transit,
            });
        }
        Ok(loads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::Duration;

    fn seed(conn: &SharedConnection) {
        let guard = conn.lock().unwrap();
        guard
            .execute(
                "INSERT INTO materials (material_id, name, price, quantity, created_at, updated_at)
                 VALUES ('m1', 'Cement', 10.0, 100, '2026-01-01 00:00:00', '2026-01-01 00:00:00')",
                [],
            )
            .unwrap();
    }

    fn driver(id: &str, minutes: i64) -> Driver {
        Driver {
            driver_id: id.to_string(),
            name: format!("Driver {}", id),
            vehicle_number: format!("TRK-{}", id),
            active: true,
            created_at: Utc::now() + Duration::minutes(minutes),
        }
    }

    fn manual(id: &str, driver_id: &str) -> Dispatch {
        let now = Utc::now();
        Dispatch {
            dispatch_id: id.to_string(),
            request_id: None,
            material_id: "m1".to_string(),
            material_name: "Cement".to_string(),
            quantity: 5,
            from_site: "Central Warehouse".to_string(),
            to_site: "Tower A".to_string(),
            driver_id: driver_id.to_string(),
            driver_name: String::new(),
            vehicle_number: String::new(),
            status: DispatchStatus::InTransit,
            dispatch_time: now,
            eta: now + Duration::days(2),
            delivery_time: None,
        }
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let repo = DispatchRepository::new(conn.clone());
        {
            let guard = conn.lock().unwrap();
            assert!(DispatchRepository::insert_if_absent_with(&guard, &manual("d1", "x")).unwrap());
            assert!(!DispatchRepository::insert_if_absent_with(&guard, &manual("d1", "x")).unwrap());
        }
        assert_eq!(repo.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_transition_status_conditional() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let repo = DispatchRepository::new(conn.clone());
        let now = Utc::now();
        {
            let guard = conn.lock().unwrap();
            DispatchRepository::insert_if_absent_with(&guard, &manual("d1", "x")).unwrap();
            assert!(DispatchRepository::transition_status_with(
                &guard, "d1", DispatchStatus::InTransit, DispatchStatus::Delivered, Some(&now)
            )
            .unwrap());
            assert!(!DispatchRepository::transition_status_with(
                &guard, "d1", DispatchStatus::InTransit, DispatchStatus::Delayed, None
            )
            .unwrap());
        }
        let d = repo.find_by_id("d1").unwrap().unwrap();
        assert_eq!(d.status, DispatchStatus::Delivered);
        assert!(d.delivery_time.is_some());
    }

    #[test]
    fn test_active_loads_in_roster_order() {
        let conn = open_in_memory().unwrap();
        seed(&conn);
        let guard = conn.lock().unwrap();
        DriverRepository::insert_with(&guard, &driver("b", 0)).unwrap();
        DriverRepository::insert_with(&guard, &driver("a", 1)).unwrap();
        let mut inactive = driver("c", 2);
        inactive.active = false;
        DriverRepository::insert_with(&guard, &inactive).unwrap();
        DispatchRepository::insert_if_absent_with(&guard, &manual("d1", "b")).unwrap();

        let loads = DriverRepository::active_loads_with(&guard).unwrap();
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].driver.driver_id, "b");
        assert_eq!(loads[0].in_transit, 1);
        assert_eq!(loads[1].driver.driver_id, "a");
        assert_eq!(loads[1].in_transit, 0);
    }
}
