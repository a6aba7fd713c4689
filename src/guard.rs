//! Rate and budget guard.
//!
//! Advisory pre-checks in front of every cost-incurring agent turn: sliding
//! request/cost windows per owner, plus a team budget ledger comparison.
//! Neither check reserves anything: concurrent sessions can both pass
//! before either commits its spend (accepted trade-off, see DESIGN.md).
//!
//! A failed team lookup fails OPEN so a monitoring outage never blocks all
//! usage.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::llm::Provider;
use crate::model::Team;

/// Outcome of a guard pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Denied {
        reason: String,
        /// When the relevant window frees up, if known
        reset_at: Option<DateTime<Utc>>,
    },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Caps for the sliding windows.
#[derive(Debug, Clone)]
pub struct GuardLimits {
    /// Max requests in any 60-second window
    pub requests_per_minute: usize,
    /// Max requests in any 1-hour window
    pub requests_per_hour: usize,
    /// Max aggregate cost in any 1-hour window, in cents
    pub hourly_cost_cents: u64,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            requests_per_hour: 200,
            hourly_cost_cents: 500,
        }
    }
}

#[derive(Debug, Clone)]
struct UsageEvent {
    at: DateTime<Utc>,
    cost_cents: u64,
}

/// Per-owner sliding-window limiter and team budget pre-check.
///
/// Window state is in-process and shared by all sessions this worker runs;
/// increments happen under one mutex so concurrent sessions for the same
/// owner observe each other.
pub struct RateBudgetGuard {
    limits: GuardLimits,
    usage: Mutex<HashMap<String, VecDeque<UsageEvent>>>,
}

impl RateBudgetGuard {
    pub fn new(limits: GuardLimits) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Check the owner's sliding windows. `estimated_cost_cents` counts
    /// toward the hourly cost cap as if the request had already happened.
    pub fn check_rate(&self, owner: &str, estimated_cost_cents: u64) -> GuardDecision {
        let now = Utc::now();
        let mut usage = match self.usage.lock() {
            Ok(g) => g,
            Err(e) => {
                // Fail open: a poisoned counter map must not block all usage.
                tracing::warn!("Usage map unavailable, allowing request: {}", e);
                return GuardDecision::Allowed;
            }
        };
        let events = usage.entry(owner.to_string()).or_default();
        prune(events, now);

        let minute_cutoff = now - Duration::seconds(60);
        let in_minute = events.iter().filter(|e| e.at > minute_cutoff).count();
        if in_minute >= self.limits.requests_per_minute {
            let reset_at = events
                .iter()
                .find(|e| e.at > minute_cutoff)
                .map(|e| e.at + Duration::seconds(60));
            return GuardDecision::Denied {
                reason: format!(
                    "rate limit: {} requests in the last minute (cap {})",
                    in_minute, self.limits.requests_per_minute
                ),
                reset_at,
            };
        }

        if events.len() >= self.limits.requests_per_hour {
            let reset_at = events.front().map(|e| e.at + Duration::hours(1));
            return GuardDecision::Denied {
                reason: format!(
                    "rate limit: {} requests in the last hour (cap {})",
                    events.len(),
                    self.limits.requests_per_hour
                ),
                reset_at,
            };
        }

        let hour_cost: u64 = events.iter().map(|e| e.cost_cents).sum();
        if hour_cost.saturating_add(estimated_cost_cents) > self.limits.hourly_cost_cents {
            let reset_at = events.front().map(|e| e.at + Duration::hours(1));
            return GuardDecision::Denied {
                reason: format!(
                    "cost limit: {} cents spent in the last hour (cap {})",
                    hour_cost, self.limits.hourly_cost_cents
                ),
                reset_at,
            };
        }

        GuardDecision::Allowed
    }

    /// Compare the team ledger plus the estimate against the team limit.
    ///
    /// `None` means the team lookup failed upstream; that fails open.
    pub fn check_budget(&self, team: Option<&Team>, estimated_cost_cents: u64) -> GuardDecision {
        let Some(team) = team else {
            tracing::warn!("Team lookup failed during budget check, allowing request");
            return GuardDecision::Allowed;
        };

        let projected = team.budget_used_cents.saturating_add(estimated_cost_cents);
        if projected > team.budget_limit_cents {
            return GuardDecision::Denied {
                reason: format!(
                    "team budget: {} of {} cents used, estimate {} would exceed the limit",
                    team.budget_used_cents, team.budget_limit_cents, estimated_cost_cents
                ),
                reset_at: None,
            };
        }
        GuardDecision::Allowed
    }

    /// Record one request against the owner's windows.
    pub fn log_usage(&self, owner: &str, provider: &Provider, tokens: u64, cost_cents: u64) {
        tracing::debug!(owner, %provider, tokens, cost_cents, "Usage logged");
        if let Ok(mut usage) = self.usage.lock() {
            let events = usage.entry(owner.to_string()).or_default();
            events.push_back(UsageEvent {
                at: Utc::now(),
                cost_cents,
            });
            prune(events, Utc::now());
        }
    }
}

impl Default for RateBudgetGuard {
    fn default() -> Self {
        Self::new(GuardLimits::default())
    }
}

/// Drop events older than the largest window (1 hour).
fn prune(events: &mut VecDeque<UsageEvent>, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(1);
    while events.front().is_some_and(|e| e.at <= cutoff) {
        events.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_string;
    use uuid::Uuid;

    fn team(limit: u64, used: u64) -> Team {
        Team {
            id: Uuid::new_v4(),
            owner: "user".into(),
            project_id: None,
            name: "t".into(),
            is_active: true,
            budget_limit_cents: limit,
            budget_used_cents: used,
            created_at: now_string(),
            updated_at: now_string(),
        }
    }

    #[test]
    fn test_allows_under_all_caps() {
        let guard = RateBudgetGuard::default();
        assert!(guard.check_rate("user", 1).is_allowed());
    }

    #[test]
    fn test_minute_window_denies_with_reset_time() {
        let guard = RateBudgetGuard::new(GuardLimits {
            requests_per_minute: 2,
            requests_per_hour: 100,
            hourly_cost_cents: 10_000,
        });
        guard.log_usage("user", &Provider::OpenAi, 100, 1);
        guard.log_usage("user", &Provider::OpenAi, 100, 1);
        match guard.check_rate("user", 1) {
            GuardDecision::Denied { reason, reset_at } => {
                assert!(reason.contains("last minute"), "{}", reason);
                assert!(reset_at.is_some());
            }
            GuardDecision::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn test_hourly_cost_cap() {
        let guard = RateBudgetGuard::new(GuardLimits {
            requests_per_minute: 100,
            requests_per_hour: 100,
            hourly_cost_cents: 10,
        });
        guard.log_usage("user", &Provider::Anthropic, 5_000, 8);
        assert!(guard.check_rate("user", 2).is_allowed());
        assert!(!guard.check_rate("user", 3).is_allowed());
    }

    #[test]
    fn test_owners_are_isolated() {
        let guard = RateBudgetGuard::new(GuardLimits {
            requests_per_minute: 1,
            requests_per_hour: 100,
            hourly_cost_cents: 10_000,
        });
        guard.log_usage("alice", &Provider::OpenAi, 10, 1);
        assert!(!guard.check_rate("alice", 0).is_allowed());
        assert!(guard.check_rate("bob", 0).is_allowed());
    }

    #[test]
    fn test_budget_denies_over_limit() {
        let guard = RateBudgetGuard::default();
        assert!(guard.check_budget(Some(&team(100, 90)), 10).is_allowed());
        assert!(!guard.check_budget(Some(&team(100, 90)), 11).is_allowed());
    }

    #[test]
    fn test_budget_lookup_failure_fails_open() {
        let guard = RateBudgetGuard::default();
        assert!(guard.check_budget(None, u64::MAX).is_allowed());
    }
}
