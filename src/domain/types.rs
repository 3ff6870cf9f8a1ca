// ==========================================
// 工地物资申领履约系统 - 领域类型定义
// ==========================================
// 职责: 申领状态、审批决定、派车状态、分配策略等枚举
// 红线: 申领状态机与派车状态机相互独立,不合并为一个枚举
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 金额比较容差（价格/预算为浮点，避免 0.1+0.2 类误差误判超预算）
pub const MONEY_EPSILON: f64 = 1e-6;

// ==========================================
// 申领状态 (Request Status)
// ==========================================
// 状态机: pending --approve--> approved
//         pending --reject-->  rejected
// approved / rejected 均为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,  // 待审批
    Approved, // 已批准
    Rejected, // 已驳回
}

impl RequestStatus {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 审批决定 (Decision)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Decision::Approve),
            "reject" | "rejected" => Some(Decision::Reject),
            _ => None,
        }
    }

    /// 决定对应的目标申领状态
    pub fn target_status(&self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }
}

// ==========================================
// 派车状态 (Dispatch Status)
// ==========================================
// 合法转换: in-transit -> delivered (写入送达时间)
//           in-transit -> delayed
// delivered / delayed 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStatus {
    InTransit, // 运输中
    Delivered, // 已送达
    Delayed,   // 延误
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::InTransit => "in-transit",
            DispatchStatus::Delivered => "delivered",
            DispatchStatus::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-transit" | "in_transit" | "intransit" => Some(DispatchStatus::InTransit),
            "delivered" => Some(DispatchStatus::Delivered),
            "delayed" => Some(DispatchStatus::Delayed),
            _ => None,
        }
    }

    /// 判断状态转换是否合法
    pub fn can_transition_to(&self, next: DispatchStatus) -> bool {
        matches!(
            (self, next),
            (DispatchStatus::InTransit, DispatchStatus::Delivered)
                | (DispatchStatus::InTransit, DispatchStatus::Delayed)
        )
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 司机分配策略 (Assignment Policy)
// ==========================================
// 自动派车时的司机/车辆选择规则，由配置 dispatch.assignment_policy 决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicyKind {
    FirstAvailable, // 名册顺序第一个在岗司机
    RoundRobin,     // 轮询
    LeastLoaded,    // 运输中派车单最少者
}

impl AssignmentPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentPolicyKind::FirstAvailable => "first_available",
            AssignmentPolicyKind::RoundRobin => "round_robin",
            AssignmentPolicyKind::LeastLoaded => "least_loaded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_available" => Some(AssignmentPolicyKind::FirstAvailable),
            "round_robin" => Some(AssignmentPolicyKind::RoundRobin),
            "least_loaded" => Some(AssignmentPolicyKind::LeastLoaded),
            _ => None,
        }
    }
}

impl Default for AssignmentPolicyKind {
    fn default() -> Self {
        AssignmentPolicyKind::FirstAvailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_status_parse() {
        assert_eq!(RequestStatus::parse("Approved"), Some(RequestStatus::Approved));
        assert_eq!(RequestStatus::parse(" pending "), Some(RequestStatus::Pending));
        assert_eq!(RequestStatus::parse("done"), None);
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
    }

    #[test]
    fn test_dispatch_transitions() {
        assert!(DispatchStatus::InTransit.can_transition_to(DispatchStatus::Delivered));
        assert!(DispatchStatus::InTransit.can_transition_to(DispatchStatus::Delayed));
        assert!(!DispatchStatus::Delivered.can_transition_to(DispatchStatus::InTransit));
        assert!(!DispatchStatus::Delayed.can_transition_to(DispatchStatus::Delivered));
        assert!(!DispatchStatus::InTransit.can_transition_to(DispatchStatus::InTransit));
    }

    #[test]
    fn test_dispatch_status_serde() {
        let json = serde_json::to_string(&DispatchStatus::InTransit).unwrap();
        assert_eq!(json, "\"in-transit\"");
        let back: DispatchStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DispatchStatus::InTransit);
    }
}
