// 引擎层单元测试共用的数据准备
use crate::db::{open_in_memory, SharedConnection};
use crate::domain::material::{Material, NewMaterial};
use crate::domain::project::Project;
use crate::domain::dispatch::Driver;
use crate::repository::{DriverRepository, MaterialRepository, ProjectRepository};
use chrono::{Duration, Utc};

pub fn memory_db() -> SharedConnection {
    open_in_memory().expect("open in-memory db")
}

pub fn seed_material(conn: &SharedConnection, id: &str, category: &str, price: f64, quantity: i64) -> Material {
    let material = NewMaterial::simple(&format!("Material {}", id), category, price, quantity)
        .into_material(id.to_string(), Utc::now());
    MaterialRepository::new(conn.clone())
        .insert(&material)
        .expect("insert material");
    material
}

pub fn seed_project(conn: &SharedConnection, id: &str, budget: f64, spent: f64) -> Project {
    let now = Utc::now();
    let project = Project {
        project_id: id.to_string(),
        name: format!("Project {}", id),
        budget,
        spent,
        created_at: now,
        updated_at: now,
    };
    ProjectRepository::new(conn.clone())
        .insert(&project)
        .expect("insert project");
    project
}

/// 登记司机（order 决定名册顺序）
pub fn seed_driver(conn: &SharedConnection, id: &str, order: i64) -> Driver {
    let driver = Driver {
        driver_id: id.to_string(),
        name: format!("Driver {}", id),
        vehicle_number: format!("TRK-{}", id),
        active: true,
        created_at: Utc::now() + Duration::seconds(order),
    };
    let guard = conn.lock().expect("lock");
    DriverRepository::insert_with(&guard, &driver).expect("insert driver");
    driver
}
