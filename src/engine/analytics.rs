// ==========================================
// 工地物资申领履约系统 - 支出分析（纯投影）
// ==========================================
// 职责: 由 (申领快照, 物资快照, 项目快照, 盘点记录) 计算
// - 按状态汇总支出
// - 已批准支出按物资类别分桶
// - 项目预算 / 支出 / 已批准费用
// - 损耗: max(0, 累计批准数量 - 最近实盘数量) × 加权单价
// 红线: 无隐藏状态；除 AnalyticsSnapshot::load 外不访问存储
// ==========================================

use crate::db::SharedConnection;
use crate::domain::audit::StockAudit;
use crate::domain::material::{Material, DEFAULT_CATEGORY};
use crate::domain::project::Project;
use crate::domain::request::MaterialRequest;
use crate::domain::types::RequestStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{
    MaterialRepository, ProjectRepository, RequestRepository, StockAuditRepository,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ==========================================
// RequestFilter - 申领过滤窗口
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub from: Option<DateTime<Utc>>, // 含
    pub to: Option<DateTime<Utc>>,   // 含
    pub project_id: Option<String>,
    pub user: Option<String>, // 匹配 user_id 或 username
}

impl RequestFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn matches(&self, request: &MaterialRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if request.requested_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if request.requested_at > to {
                return false;
            }
        }
        if let Some(project_id) = &self.project_id {
            if &request.project_id != project_id {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &request.user_id != user && &request.username != user {
                return false;
            }
        }
        true
    }
}

// ==========================================
// 投影结果
// ==========================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendingSummary {
    pub request_count: usize,
    pub approved_count: usize,
    pub pending_count: usize,
    pub rejected_count: usize,
    pub approved_spending: f64,
    pub pending_spending: f64,
    pub rejected_spending: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpending {
    pub category: String,
    pub approved_quantity: i64,
    pub approved_spending: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpending {
    pub project_id: String,
    pub name: String,
    pub budget: f64,
    pub spent: f64,
    pub approved_cost: f64, // 窗口内已批准费用
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WastageRow {
    pub material_id: String,
    pub material_name: String,
    pub requested: i64, // 累计批准数量
    pub consumed: i64,  // 最近一次实盘数量
    pub wasted: i64,
    pub cost_of_wastage: f64,
    pub audited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingReport {
    pub filter: RequestFilter,
    pub summary: SpendingSummary,
    pub by_category: Vec<CategorySpending>,
    pub by_project: Vec<ProjectSpending>,
    pub wastage: Vec<WastageRow>,
    pub total_wastage_cost: f64,
}

// ==========================================
// AnalyticsSnapshot - 投影输入
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub requests: Vec<MaterialRequest>,
    pub materials: Vec<Material>,
    pub projects: Vec<Project>,
    pub audits: Vec<StockAudit>,
}

impl AnalyticsSnapshot {
    /// 在同一把连接锁下读取全部输入（各集合之间一致）
    pub fn load(conn: &SharedConnection) -> RepositoryResult<Self> {
        let guard = conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(Self {
            requests: RequestRepository::list_all_with(&guard)?,
            materials: MaterialRepository::list_all_with(&guard)?,
            projects: ProjectRepository::list_all_with(&guard)?,
            audits: StockAuditRepository::list_all_with(&guard)?,
        })
    }
}

// ==========================================
// SpendingAnalytics - 支出分析
// ==========================================
pub struct SpendingAnalytics {
    // 无状态投影
}

impl SpendingAnalytics {
    /// 过滤窗口内的申领
    pub fn filter<'a>(
        requests: &'a [MaterialRequest],
        filter: &RequestFilter,
    ) -> Vec<&'a MaterialRequest> {
        requests.iter().filter(|r| filter.matches(r)).collect()
    }

    /// 按状态汇总
    pub fn summarize(requests: &[MaterialRequest], filter: &RequestFilter) -> SpendingSummary {
        let mut summary = SpendingSummary::default();
        for request in Self::filter(requests, filter) {
            summary.request_count += 1;
            match request.status {
                RequestStatus::Approved => {
                    summary.approved_count += 1;
                    summary.approved_spending += request.total_cost;
                }
                RequestStatus::Pending => {
                    summary.pending_count += 1;
                    summary.pending_spending += request.total_cost;
                }
                RequestStatus::Rejected => {
                    summary.rejected_count += 1;
                    summary.rejected_spending += request.total_cost;
                }
            }
        }
        summary
    }

    /// 已批准支出按物资类别分桶（支出降序，同额按类别名）
    pub fn by_category(
        requests: &[MaterialRequest],
        materials: &[Material],
        filter: &RequestFilter,
    ) -> Vec<CategorySpending> {
        let category_of: HashMap<&str, &str> = materials
            .iter()
            .map(|m| (m.material_id.as_str(), m.category.as_str()))
            .collect();

        let mut buckets: BTreeMap<String, (i64, f64)> = BTreeMap::new();
        for request in Self::filter(requests, filter)
            .into_iter()
            .filter(|r| r.status == RequestStatus::Approved)
        {
            let category = category_of
                .get(request.material_id.as_str())
                .copied()
                .unwrap_or(DEFAULT_CATEGORY);
            let bucket = buckets.entry(category.to_string()).or_insert((0, 0.0));
            bucket.0 += request.quantity_requested;
            bucket.1 += request.total_cost;
        }

        let mut rows: Vec<CategorySpending> = buckets
            .into_iter()
            .map(|(category, (approved_quantity, approved_spending))| CategorySpending {
                category,
                approved_quantity,
                approved_spending,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.approved_spending
                .total_cmp(&a.approved_spending)
                .then_with(|| a.category.cmp(&b.category))
        });
        rows
    }

    /// 各项目预算 / 支出 / 窗口内已批准费用（项目名排序）
    pub fn by_project(
        requests: &[MaterialRequest],
        projects: &[Project],
        filter: &RequestFilter,
    ) -> Vec<ProjectSpending> {
        let mut approved_cost: HashMap<&str, f64> = HashMap::new();
        for request in Self::filter(requests, filter)
            .into_iter()
            .filter(|r| r.status == RequestStatus::Approved)
        {
            *approved_cost.entry(request.project_id.as_str()).or_insert(0.0) += request.total_cost;
        }

        let mut rows: Vec<ProjectSpending> = projects
            .iter()
            .filter(|p| {
                filter
                    .project_id
                    .as_ref()
                    .map(|id| id == &p.project_id)
                    .unwrap_or(true)
            })
            .map(|p| ProjectSpending {
                project_id: p.project_id.clone(),
                name: p.name.clone(),
                budget: p.budget,
                spent: p.spent,
                approved_cost: approved_cost
                    .get(p.project_id.as_str())
                    .copied()
                    .unwrap_or(0.0),
                remaining: p.remaining(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.project_id.cmp(&b.project_id)));
        rows
    }

    /// 损耗分析
    ///
    /// 只统计既有已批准申领、又至少盘点过一次的物资；
    /// 单价 = 累计批准费用 / 累计批准数量（数量为 0 时损耗费用为 0）
    pub fn wastage(
        requests: &[MaterialRequest],
        audits: &[StockAudit],
        filter: &RequestFilter,
    ) -> Vec<WastageRow> {
        // material_id -> (名称, 累计数量, 累计费用)
        let mut approved: BTreeMap<&str, (&str, i64, f64)> = BTreeMap::new();
        for request in Self::filter(requests, filter)
            .into_iter()
            .filter(|r| r.status == RequestStatus::Approved)
        {
            let entry = approved
                .entry(request.material_id.as_str())
                .or_insert((request.material_name.as_str(), 0, 0.0));
            entry.1 += request.quantity_requested;
            entry.2 += request.total_cost;
        }

        let mut latest: HashMap<&str, &StockAudit> = HashMap::new();
        for audit in audits {
            let slot = latest.entry(audit.material_id.as_str()).or_insert(audit);
            if audit.audited_at >= slot.audited_at {
                *slot = audit;
            }
        }

        approved
            .into_iter()
            .filter_map(|(material_id, (name, requested, cost))| {
                let audit = latest.get(material_id)?;
                let wasted = (requested - audit.actual_quantity).max(0);
                let unit_cost = if requested > 0 {
                    cost / requested as f64
                } else {
                    0.0
                };
                Some(WastageRow {
                    material_id: material_id.to_string(),
                    material_name: if audit.material_name.is_empty() {
                        name.to_string()
                    } else {
                        audit.material_name.clone()
                    },
                    requested,
                    consumed: audit.actual_quantity,
                    wasted,
                    cost_of_wastage: wasted as f64 * unit_cost,
                    audited_at: audit.audited_at,
                })
            })
            .collect()
    }

    /// 低库存物资（数量低于阈值，数量升序）
    pub fn low_stock(materials: &[Material], threshold: i64) -> Vec<Material> {
        let mut low: Vec<Material> = materials
            .iter()
            .filter(|m| m.quantity < threshold)
            .cloned()
            .collect();
        low.sort_by(|a, b| {
            a.quantity
                .cmp(&b.quantity)
                .then_with(|| a.material_id.cmp(&b.material_id))
        });
        low
    }

    /// 完整报告
    pub fn report(snapshot: &AnalyticsSnapshot, filter: &RequestFilter) -> SpendingReport {
        let wastage = Self::wastage(&snapshot.requests, &snapshot.audits, filter);
        let total_wastage_cost = wastage.iter().map(|w| w.cost_of_wastage).sum();
        SpendingReport {
            filter: filter.clone(),
            summary: Self::summarize(&snapshot.requests, filter),
            by_category: Self::by_category(&snapshot.requests, &snapshot.materials, filter),
            by_project: Self::by_project(&snapshot.requests, &snapshot.projects, filter),
            wastage,
            total_wastage_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 8, 0, 0).unwrap()
    }

    fn request(
        id: &str,
        material_id: &str,
        project_id: &str,
        qty: i64,
        cost: f64,
        status: RequestStatus,
        day: u32,
    ) -> MaterialRequest {
        MaterialRequest {
            request_id: id.to_string(),
            material_id: material_id.to_string(),
            material_name: format!("Material {}", material_id),
            quantity_requested: qty,
            total_cost: cost,
            user_id: "u1".to_string(),
            username: "worker1".to_string(),
            project_id: project_id.to_string(),
            status,
            requested_at: ts(day),
            responded_at: None,
            response_message: None,
            delivery_assigned: false,
        }
    }

    fn material(id: &str, category: &str, quantity: i64) -> Material {
        Material {
            material_id: id.to_string(),
            name: format!("Material {}", id),
            category: category.to_string(),
            unit_type: "bag".to_string(),
            price: 10.0,
            quantity,
            supplier: String::new(),
            description: String::new(),
            created_at: ts(1),
            updated_at: ts(1),
        }
    }

    fn audit(material_id: &str, recorded: i64, actual: i64, at: DateTime<Utc>) -> StockAudit {
        StockAudit {
            audit_id: format!("a-{}-{}", material_id, at.timestamp()),
            material_id: material_id.to_string(),
            material_name: format!("Material {}", material_id),
            recorded_quantity: recorded,
            actual_quantity: actual,
            audited_at: at,
            audited_by: "inspector1".to_string(),
        }
    }

    fn sample_requests() -> Vec<MaterialRequest> {
        vec![
            request("r1", "M", "P1", 30, 300.0, RequestStatus::Approved, 1),
            request("r2", "M", "P1", 10, 100.0, RequestStatus::Pending, 2),
            request("r3", "S", "P2", 5, 250.0, RequestStatus::Rejected, 3),
            request("r4", "S", "P2", 4, 200.0, RequestStatus::Approved, 4),
        ]
    }

    #[test]
    fn test_summary_by_status() {
        let summary = SpendingAnalytics::summarize(&sample_requests(), &RequestFilter::all());
        assert_eq!(summary.request_count, 4);
        assert_eq!(summary.approved_spending, 500.0);
        assert_eq!(summary.pending_spending, 100.0);
        assert_eq!(summary.rejected_spending, 250.0);
        assert_eq!(summary.approved_count, 2);
    }

    #[test]
    fn test_filter_window() {
        let requests = sample_requests();
        let by_project = RequestFilter::all().with_project("P2");
        assert_eq!(SpendingAnalytics::filter(&requests, &by_project).len(), 2);

        let window = RequestFilter::all().between(Some(ts(2)), Some(ts(3)));
        let ids: Vec<&str> = SpendingAnalytics::filter(&requests, &window)
            .iter()
            .map(|r| r.request_id.as_str())
            .collect();
        assert_eq!(ids, vec!["r2", "r3"]);

        let pending = RequestFilter::all().with_status(RequestStatus::Pending);
        assert_eq!(SpendingAnalytics::summarize(&requests, &pending).pending_count, 1);

        assert_eq!(
            SpendingAnalytics::filter(&requests, &RequestFilter::all().with_user("worker1")).len(),
            4
        );
        assert!(SpendingAnalytics::filter(&requests, &RequestFilter::all().with_user("nobody")).is_empty());
    }

    #[test]
    fn test_category_buckets_only_approved() {
        let materials = vec![material("M", "Cement", 70), material("S", "Steel", 10)];
        let rows = SpendingAnalytics::by_category(&sample_requests(), &materials, &RequestFilter::all());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category, "Cement");
        assert_eq!(rows[0].approved_spending, 300.0);
        assert_eq!(rows[1].category, "Steel");
        assert_eq!(rows[1].approved_quantity, 4);
    }

    #[test]
    fn test_unknown_material_falls_into_default_category() {
        let rows = SpendingAnalytics::by_category(&sample_requests(), &[], &RequestFilter::all());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, DEFAULT_CATEGORY);
        assert_eq!(rows[0].approved_spending, 500.0);
    }

    #[test]
    fn test_project_rows() {
        let projects = vec![
            Project {
                project_id: "P1".to_string(),
                name: "Alpha".to_string(),
                budget: 1000.0,
                spent: 300.0,
                created_at: ts(1),
                updated_at: ts(1),
            },
            Project {
                project_id: "P2".to_string(),
                name: "Beta".to_string(),
                budget: 150.0,
                spent: 200.0,
                created_at: ts(1),
                updated_at: ts(1),
            },
        ];
        let rows = SpendingAnalytics::by_project(&sample_requests(), &projects, &RequestFilter::all());
        assert_eq!(rows[0].name, "Alpha");
        assert_eq!(rows[0].approved_cost, 300.0);
        assert_eq!(rows[0].remaining, 700.0);
        assert_eq!(rows[1].approved_cost, 200.0);
        assert_eq!(rows[1].remaining, 0.0);

        let only_beta =
            SpendingAnalytics::by_project(&sample_requests(), &projects, &RequestFilter::all().with_project("P2"));
        assert_eq!(only_beta.len(), 1);
    }

    #[test]
    fn test_wastage_uses_latest_audit() {
        let requests = vec![
            request("r1", "M", "P1", 30, 300.0, RequestStatus::Approved, 1),
            request("r2", "M", "P1", 20, 240.0, RequestStatus::Approved, 2),
            request("r3", "M", "P1", 99, 990.0, RequestStatus::Rejected, 2),
        ];
        let audits = vec![
            audit("M", 50, 45, ts(5)),
            audit("M", 45, 35, ts(6)),
        ];
        let rows = SpendingAnalytics::wastage(&requests, &audits, &RequestFilter::all());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.requested, 50);
        assert_eq!(row.consumed, 35);
        assert_eq!(row.wasted, 15);
        // 加权单价 = 540 / 50
        assert!((row.cost_of_wastage - 15.0 * 10.8).abs() < 1e-9);
        assert_eq!(row.audited_at, ts(6));
    }

    #[test]
    fn test_wastage_never_negative_and_needs_audit() {
        let requests = vec![
            request("r1", "M", "P1", 10, 100.0, RequestStatus::Approved, 1),
            request("r2", "S", "P1", 10, 100.0, RequestStatus::Approved, 1),
        ];
        let audits = vec![audit("M", 90, 80, ts(2) + Duration::hours(1))];
        let rows = SpendingAnalytics::wastage(&requests, &audits, &RequestFilter::all());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].material_id, "M");
        assert_eq!(rows[0].wasted, 0);
        assert_eq!(rows[0].cost_of_wastage, 0.0);
    }

    #[test]
    fn test_wastage_zero_quantity_guard() {
        let requests = vec![request("r1", "M", "P1", 0, 0.0, RequestStatus::Approved, 1)];
        let audits = vec![audit("M", 0, 0, ts(2))];
        let rows = SpendingAnalytics::wastage(&requests, &audits, &RequestFilter::all());
        assert_eq!(rows[0].cost_of_wastage, 0.0);
        assert!(rows[0].cost_of_wastage.is_finite());
    }

    #[test]
    fn test_low_stock() {
        let materials = vec![
            material("a", "Cement", 12),
            material("b", "Cement", 3),
            material("c", "Steel", 0),
            material("d", "Steel", 10),
        ];
        let low = SpendingAnalytics::low_stock(&materials, 10);
        let ids: Vec<&str> = low.iter().map(|m| m.material_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_report_is_pure() {
        let snapshot = AnalyticsSnapshot {
            requests: sample_requests(),
            materials: vec![material("M", "Cement", 70)],
            projects: vec![],
            audits: vec![audit("M", 70, 60, ts(7))],
        };
        let first = SpendingAnalytics::report(&snapshot, &RequestFilter::all());
        let second = SpendingAnalytics::report(&snapshot, &RequestFilter::all());
        assert_eq!(first, second);
        assert_eq!(first.wastage.len(), 1);
        assert_eq!(first.total_wastage_cost, 0.0);
    }
}
