// ==========================================
// 工地物资申领履约系统 - 物资数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: materials 表的读写；库存增减使用条件更新（库存不为负）
// 约定: `*_with(&Connection, ..)` 供事务内调用，实例方法自行加锁
// ==========================================

use crate::db::SharedConnection;
use crate::domain::material::{Material, DEFAULT_CATEGORY, DEFAULT_UNIT_TYPE};
use crate::repository::codec::{fmt_ts, or_default, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

const SELECT_MATERIAL: &str = r#"
    SELECT material_id, name, category, unit_type, price, quantity,
           supplier, description, created_at, updated_at
    FROM materials
"#;

/// 原始行（仅存在于仓储层内部）
struct MaterialRow {
    material_id: String,
    name: String,
    category: Option<String>,
    unit_type: Option<String>,
    price: f64,
    quantity: i64,
    supplier: Option<String>,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl MaterialRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            material_id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            unit_type: row.get(3)?,
            price: row.get(4)?,
            quantity: row.get(5)?,
            supplier: row.get(6)?,
            description: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_entity(self) -> RepositoryResult<Material> {
        Ok(Material {
            material_id: self.material_id,
            name: self.name,
            category: or_default(self.category, DEFAULT_CATEGORY),
            unit_type: or_default(self.unit_type, DEFAULT_UNIT_TYPE),
            price: self.price,
            quantity: self.quantity,
            supplier: self.supplier.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            created_at: parse_ts("materials.created_at", &self.created_at)?,
            updated_at: parse_ts("materials.updated_at", &self.updated_at)?,
        })
    }
}

// ==========================================
// MaterialRepository - 物资仓储
// ==========================================
pub struct MaterialRepository {
    conn: SharedConnection,
}

impl MaterialRepository {
    /// 从共享连接创建仓储实例
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入物资
    pub fn insert(&self, material: &Material) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, material)
    }

    pub fn insert_with(conn: &Connection, material: &Material) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO materials (
                material_id, name, category, unit_type, price, quantity,
                supplier, description, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                material.material_id,
                material.name,
                material.category,
                material.unit_type,
                material.price,
                material.quantity,
                material.supplier,
                material.description,
                fmt_ts(&material.created_at),
                fmt_ts(&material.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按增量调整库存（条件更新：结果不得为负）
    ///
    /// # 返回
    /// - `Ok(true)`: 已调整
    /// - `Ok(false)`: 物资不存在或库存不足，未做任何修改
    pub fn adjust_quantity_with(
        conn: &Connection,
        material_id: &str,
        delta: i64,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE materials
            SET quantity = quantity + ?2, updated_at = ?3
            WHERE material_id = ?1 AND quantity + ?2 >= 0
            "#,
            params![material_id, delta, fmt_ts(now)],
        )?;
        Ok(rows == 1)
    }

    /// 覆写库存（盘点对账）
    pub fn set_quantity_with(
        conn: &Connection,
        material_id: &str,
        quantity: i64,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE materials SET quantity = ?2, updated_at = ?3 WHERE material_id = ?1",
            params![material_id, quantity, fmt_ts(now)],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Material".to_string(),
                id: material_id.to_string(),
            });
        }
        Ok(())
    }

    /// 调整单价
    pub fn update_price_with(
        conn: &Connection,
        material_id: &str,
        price: f64,
        now: &DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE materials SET price = ?2, updated_at = ?3 WHERE material_id = ?1",
            params![material_id, price, fmt_ts(now)],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Material".to_string(),
                id: material_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按主键查询
    pub fn find_by_id(&self, material_id: &str) -> RepositoryResult<Option<Material>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, material_id)
    }

    pub fn find_by_id_with(conn: &Connection, material_id: &str) -> RepositoryResult<Option<Material>> {
        let sql = format!("{} WHERE material_id = ?1", SELECT_MATERIAL);
        let row = conn
            .query_row(&sql, params![material_id], MaterialRow::from_row)
            .optional()?;
        row.map(MaterialRow::into_entity).transpose()
    }

    /// 查询全部物资（按名称排序）
    pub fn list_all(&self) -> RepositoryResult<Vec<Material>> {
        let conn = self.get_conn()?;
        Self::list_all_with(&conn)
    }

    pub fn list_all_with(conn: &Connection) -> RepositoryResult<Vec<Material>> {
        let sql = format!("{} ORDER BY name, material_id", SELECT_MATERIAL);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], MaterialRow::from_row)?;

        let mut materials = Vec::new();
        for row in rows {
            materials.push(row?.into_entity()?);
        }
        Ok(materials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::material::NewMaterial;

    fn setup() -> (SharedConnection, MaterialRepository) {
        let conn = open_in_memory().unwrap();
        let repo = MaterialRepository::new(conn.clone());
        (conn, repo)
    }

    fn seed(repo: &MaterialRepository, id: &str, quantity: i64) {
        let material = NewMaterial::simple("Cement", "Binder", 10.0, quantity)
            .into_material(id.to_string(), Utc::now());
        repo.insert(&material).unwrap();
    }

    #[test]
    fn test_insert_and_find() {
        let (_conn, repo) = setup();
        seed(&repo, "m1", 100);

        let found = repo.find_by_id("m1").unwrap().unwrap();
        assert_eq!(found.quantity, 100);
        assert_eq!(found.category, "Binder");
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_adjust_quantity_guards_negative() {
        let (conn, repo) = setup();
        seed(&repo, "m1", 100);
        let now = Utc::now();

        {
            let guard = conn.lock().unwrap();
            assert!(MaterialRepository::adjust_quantity_with(&guard, "m1", -30, &now).unwrap());
            assert!(!MaterialRepository::adjust_quantity_with(&guard, "m1", -71, &now).unwrap());
            assert!(!MaterialRepository::adjust_quantity_with(&guard, "missing", 5, &now).unwrap());
        }

        assert_eq!(repo.find_by_id("m1").unwrap().unwrap().quantity, 70);
    }

    #[test]
    fn test_null_optional_columns_default_filled() {
        let (conn, repo) = setup();
        {
            let guard = conn.lock().unwrap();
            guard
                .execute(
                    "INSERT INTO materials (material_id, name, price, quantity, created_at, updated_at)
                     VALUES ('m9', 'Rebar', 4.0, 5, '2026-01-01 00:00:00', '2026-01-01 00:00:00')",
                    [],
                )
                .unwrap();
        }
        let m = repo.find_by_id("m9").unwrap().unwrap();
        assert_eq!(m.category, DEFAULT_CATEGORY);
        assert_eq!(m.unit_type, DEFAULT_UNIT_TYPE);
        assert_eq!(m.supplier, "");
    }

    #[test]
    fn test_set_quantity_missing_material() {
        let (conn, _repo) = setup();
        let guard = conn.lock().unwrap();
        let err = MaterialRepository::set_quantity_with(&guard, "missing", 1, &Utc::now()).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
