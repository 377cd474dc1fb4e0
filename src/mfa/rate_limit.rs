//! Rate limiting for factor enrollment and step-up attempts.
//!
//! Scores are signed: a positive cost consumes capacity, zero probes without
//! recording anything, and a negative cost refunds a previous consumption.
//! Usage is folded in order and floored at zero after every score, so a
//! refund can only give back capacity that is still counted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

use super::AccountId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// Attempts to add a factor.
    NewFactor,
    /// Proofs submitted to complete a step-up challenge.
    TryFactor,
}

impl RateLimitAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewFactor => "new-factor",
            Self::TryFactor => "try-factor",
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied,
}

/// Maximum score allowed per account inside a sliding window.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    limit: i64,
    window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(limit: i64, window: Duration) -> Self {
        Self { limit, window }
    }

    #[must_use]
    pub const fn limit(&self) -> i64 {
        self.limit
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Decide a request of `cost` given the score already used in the window.
    #[must_use]
    pub fn decide(&self, used: i64, cost: i64) -> RateLimitDecision {
        let used = used.max(0);
        let allowed = match cost {
            c if c < 0 => true,
            0 => used < self.limit,
            c => used.saturating_add(c) <= self.limit,
        };
        if allowed {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Denied
        }
    }
}

/// Policy per rate limited action.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicies {
    new_factor: RateLimitPolicy,
    try_factor: RateLimitPolicy,
}

impl RateLimitPolicies {
    #[must_use]
    pub const fn new(new_factor: RateLimitPolicy, try_factor: RateLimitPolicy) -> Self {
        Self {
            new_factor,
            try_factor,
        }
    }

    #[must_use]
    pub const fn for_action(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action {
            RateLimitAction::NewFactor => self.new_factor,
            RateLimitAction::TryFactor => self.try_factor,
        }
    }
}

impl From<RateLimitPolicy> for RateLimitPolicies {
    /// The same policy for every action.
    fn from(policy: RateLimitPolicy) -> Self {
        Self::new(policy, policy)
    }
}

/// Score to store for an allowed `cost`. Refunds are clamped to the usage
/// they cancel; `None` means nothing is recorded.
pub(crate) fn recorded_cost(used: i64, cost: i64) -> Option<i64> {
    let cost = if cost < 0 { cost.max(-used.max(0)) } else { cost };
    (cost != 0).then_some(cost)
}

/// Windowed usage, floored at zero after every score.
pub(crate) fn floored_sum(scores: impl IntoIterator<Item = i64>) -> i64 {
    scores
        .into_iter()
        .fold(0_i64, |sum, score| sum.saturating_add(score).max(0))
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide and, when allowed with a non-zero cost, record the action.
    async fn will_take_action(
        &self,
        account: AccountId,
        action: RateLimitAction,
        cost: i64,
    ) -> Result<RateLimitDecision>;
}

type ActionKey = (AccountId, RateLimitAction);

/// Process-local limiter. Decide and record happen under one lock.
pub struct InMemoryRateLimiter {
    policies: RateLimitPolicies,
    entries: Mutex<HashMap<ActionKey, VecDeque<(Instant, i64)>>>,
}

impl InMemoryRateLimiter {
    #[must_use]
    pub fn new(policies: impl Into<RateLimitPolicies>) -> Self {
        Self {
            policies: policies.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Score currently counted against the account.
    pub async fn usage(&self, account: AccountId, action: RateLimitAction) -> i64 {
        let window = self.policies.for_action(action).window();
        let mut entries = self.entries.lock().await;
        entries.get_mut(&(account, action)).map_or(0, |log| {
            prune(log, window);
            windowed_sum(log)
        })
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn will_take_action(
        &self,
        account: AccountId,
        action: RateLimitAction,
        cost: i64,
    ) -> Result<RateLimitDecision> {
        let policies = self.policies;
        let mut entries = self.entries.lock().await;
        entries.retain(|(_, action), log| {
            prune(log, policies.for_action(*action).window());
            !log.is_empty()
        });
        let log = entries.entry((account, action)).or_default();
        let used = windowed_sum(log);
        let decision = policies.for_action(action).decide(used, cost);
        if decision == RateLimitDecision::Allowed {
            if let Some(score) = recorded_cost(used, cost) {
                log.push_back((Instant::now(), score));
            }
        }
        Ok(decision)
    }
}

fn prune(log: &mut VecDeque<(Instant, i64)>, window: Duration) {
    while log.front().is_some_and(|(at, _)| at.elapsed() >= window) {
        log.pop_front();
    }
}

fn windowed_sum(log: &VecDeque<(Instant, i64)>) -> i64 {
    floored_sum(log.iter().map(|(_, score)| *score))
}

/// Map a denial into the limiter error for `action`.
pub(crate) fn ensure_allowed(
    decision: RateLimitDecision,
    action: RateLimitAction,
) -> super::FactorResult<()> {
    match decision {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Denied => Err(super::FactorError::RateLimited { action }),
    }
}

/// Convert a window into whole seconds for SQL intervals.
pub(crate) fn window_seconds(window: Duration) -> Result<i64> {
    i64::try_from(window.as_secs()).context("rate limit window out of range")
}
