//! Seat Limits
//!
//! Pure mapping from plan to seat capacity, plus the guard that compares
//! metered usage against it. Usage itself comes from
//! `MembershipStore::usage_count`, which counts every invitation of every
//! fleet the owner owns, whatever its status.

use fleetseat_shared::Plan;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Seat capacity for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatLimit {
    Limited(u64),
    Unlimited,
}

impl SeatLimit {
    /// Whether `usage` occupied seats leave room for one more
    pub fn admits(&self, usage: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(limit) => usage < *limit,
        }
    }
}

impl std::fmt::Display for SeatLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Seats for a known plan. FREE is unlimited because it only exists as a trial.
pub fn limit_for(plan: Plan) -> SeatLimit {
    match plan {
        Plan::Free => SeatLimit::Unlimited,
        Plan::Basic => SeatLimit::Limited(1),
        Plan::Standard => SeatLimit::Limited(5),
        Plan::Premium => SeatLimit::Limited(15),
        Plan::Enterprise => SeatLimit::Unlimited,
    }
}

/// Seats for a raw plan name. Unrecognized names get a single seat.
pub fn limit_for_name(plan: &str) -> SeatLimit {
    plan.parse::<Plan>()
        .map(limit_for)
        .unwrap_or(SeatLimit::Limited(1))
}

/// Outcome of a seat check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatDecision {
    Allow,
    Deny { plan: String, used: u64, limit: u64 },
}

impl SeatDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self) -> Result<(), BillingError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { plan, used, limit } => {
                Err(BillingError::SeatLimitReached { plan, used, limit })
            }
        }
    }
}

/// Deny when the plan's limit is finite and `usage >= limit`
pub fn guard(usage: u64, plan: &str) -> SeatDecision {
    match limit_for_name(plan) {
        limit if limit.admits(usage) => SeatDecision::Allow,
        SeatLimit::Limited(limit) => SeatDecision::Deny {
            plan: plan.trim().to_uppercase(),
            used: usage,
            limit,
        },
        SeatLimit::Unlimited => SeatDecision::Allow,
    }
}

/// Whether moving to `target` would strand seats already in use
pub fn downgrade_blocked(usage: u64, target: Plan) -> Option<BillingError> {
    match limit_for(target) {
        SeatLimit::Limited(limit) if usage > limit => Some(BillingError::DowngradeBlocked {
            plan: target,
            used: usage,
            limit,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_plan_limits() {
        assert_eq!(limit_for(Plan::Free), SeatLimit::Unlimited);
        assert_eq!(limit_for(Plan::Basic), SeatLimit::Limited(1));
        assert_eq!(limit_for(Plan::Standard), SeatLimit::Limited(5));
        assert_eq!(limit_for(Plan::Premium), SeatLimit::Limited(15));
        assert_eq!(limit_for(Plan::Enterprise), SeatLimit::Unlimited);
    }

    #[test]
    fn test_unrecognized_plan_gets_one_seat() {
        assert_eq!(limit_for_name("GOLD"), SeatLimit::Limited(1));
        assert_eq!(limit_for_name(""), SeatLimit::Limited(1));
        assert!(guard(0, "GOLD").is_allowed());
        assert!(!guard(1, "GOLD").is_allowed());
    }

    #[test]
    fn test_standard_boundary() {
        assert!(guard(4, "STANDARD").is_allowed());
        assert_eq!(
            guard(5, "STANDARD"),
            SeatDecision::Deny {
                plan: "STANDARD".to_string(),
                used: 5,
                limit: 5
            }
        );
    }

    #[test]
    fn test_unlimited_plans_ignore_usage() {
        assert!(guard(10_000, "FREE").is_allowed());
        assert!(guard(10_000, "enterprise").is_allowed());
    }

    #[test]
    fn test_denial_becomes_seat_limit_error() {
        let err = guard(15, "PREMIUM").into_result().unwrap_err();
        assert!(matches!(
            err,
            BillingError::SeatLimitReached { used: 15, limit: 15, .. }
        ));
    }

    #[test]
    fn test_downgrade_blocked_only_when_usage_exceeds_new_limit() {
        assert!(downgrade_blocked(5, Plan::Standard).is_none());
        assert!(downgrade_blocked(6, Plan::Standard).is_some());
        assert!(downgrade_blocked(100, Plan::Enterprise).is_none());
    }

    #[test]
    fn test_admits() {
        assert!(SeatLimit::Limited(1).admits(0));
        assert!(!SeatLimit::Limited(1).admits(1));
        assert!(SeatLimit::Unlimited.admits(u64::MAX));
    }
}
