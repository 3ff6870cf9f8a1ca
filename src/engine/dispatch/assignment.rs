// ==========================================
// 工地物资申领履约系统 - 司机分配策略
// ==========================================
// 职责: 自动派车时从在岗司机中选出一名
// 输入: 在岗司机（名册顺序）及其运输中派车单数
// 约定: 名册顺序 = 登记时间升序，同时刻按 driver_id
// ==========================================

use crate::domain::dispatch::{Driver, DriverLoad};
use crate::domain::types::AssignmentPolicyKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 司机分配策略
pub trait AssignmentPolicy: Send + Sync {
    fn kind(&self) -> AssignmentPolicyKind;

    /// 选择司机；无候选时返回 None
    fn select(&self, candidates: &[DriverLoad]) -> Option<Driver>;
}

/// 名册顺序第一个在岗司机
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl AssignmentPolicy for FirstAvailable {
    fn kind(&self) -> AssignmentPolicyKind {
        AssignmentPolicyKind::FirstAvailable
    }

    fn select(&self, candidates: &[DriverLoad]) -> Option<Driver> {
        candidates.first().map(|c| c.driver.clone())
    }
}

/// 轮询（游标跨调用保持）
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl AssignmentPolicy for RoundRobin {
    fn kind(&self) -> AssignmentPolicyKind {
        AssignmentPolicyKind::RoundRobin
    }

    fn select(&self, candidates: &[DriverLoad]) -> Option<Driver> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].driver.clone())
    }
}

/// 运输中派车单最少者（并列取名册靠前者）
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl AssignmentPolicy for LeastLoaded {
    fn kind(&self) -> AssignmentPolicyKind {
        AssignmentPolicyKind::LeastLoaded
    }

    fn select(&self, candidates: &[DriverLoad]) -> Option<Driver> {
        candidates
            .iter()
            .min_by_key(|c| c.in_transit)
            .map(|c| c.driver.clone())
    }
}

/// 按策略类型构造策略实例
pub fn policy_for(kind: AssignmentPolicyKind) -> Arc<dyn AssignmentPolicy> {
    match kind {
        AssignmentPolicyKind::FirstAvailable => Arc::new(FirstAvailable),
        AssignmentPolicyKind::RoundRobin => Arc::new(RoundRobin::default()),
        AssignmentPolicyKind::LeastLoaded => Arc::new(LeastLoaded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn load(id: &str, in_transit: i64) -> DriverLoad {
        DriverLoad {
            driver: Driver {
                driver_id: id.to_string(),
                name: id.to_string(),
                vehicle_number: format!("TRK-{}", id),
                active: true,
                created_at: Utc::now(),
            },
            in_transit,
        }
    }

    fn ids(policy: &dyn AssignmentPolicy, candidates: &[DriverLoad], n: usize) -> Vec<String> {
        (0..n)
            .filter_map(|_| policy.select(candidates))
            .map(|d| d.driver_id)
            .collect()
    }

    #[test]
    fn test_first_available_is_stable() {
        let roster = vec![load("a", 3), load("b", 0)];
        assert_eq!(ids(&FirstAvailable, &roster, 3), vec!["a", "a", "a"]);
    }

    #[test]
    fn test_round_robin_cycles_roster() {
        let roster = vec![load("a", 0), load("b", 0), load("c", 0)];
        let policy = RoundRobin::default();
        assert_eq!(ids(&policy, &roster, 4), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_least_loaded_breaks_ties_by_roster_order() {
        let roster = vec![load("a", 2), load("b", 1), load("c", 1)];
        assert_eq!(ids(&LeastLoaded, &roster, 1), vec!["b"]);
    }

    #[test]
    fn test_empty_roster_selects_nobody() {
        for kind in [
            AssignmentPolicyKind::FirstAvailable,
            AssignmentPolicyKind::RoundRobin,
            AssignmentPolicyKind::LeastLoaded,
        ] {
            let policy = policy_for(kind);
            assert_eq!(policy.kind(), kind);
            assert!(policy.select(&[]).is_none());
        }
    }
}
