//! Per-lens sliding window rate limiter.
//!
//! Each [`AgentLens`] owns a queue of operation timestamps. A check prunes
//! entries older than the window, then either records the new operation or
//! rejects it with the time until the oldest entry expires. The limiter
//! knows nothing about the operations it gates.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::session::AgentLens;

/// Outcome of a [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Operation recorded; `count` includes it.
    Allowed { count: usize },
    /// Window is full until the oldest entry expires.
    Limited { retry_after: Duration, count: usize },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    /// Whole seconds to wait, rounded up, at least 1. Zero when allowed.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            RateDecision::Allowed { .. } => 0,
            RateDecision::Limited { retry_after, .. } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                secs.max(1)
            }
        }
    }
}

/// Read-only view of one lens's window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowStatus {
    pub agent_lens: AgentLens,
    pub count: usize,
    pub limit: usize,
    pub remaining: usize,
    pub window_seconds: u64,
    /// Seconds until the oldest entry leaves the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_in_seconds: Option<f64>,
}

/// Sliding window limiter shared by all sessions.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<AgentLens, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a new limiter.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.ops_per_window,
            window: Duration::from_secs(config.window_seconds),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentLens, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check and, if allowed, record an operation for `lens` now.
    pub fn check(&self, lens: AgentLens) -> RateDecision {
        self.check_at(lens, Instant::now())
    }

    /// Check against an explicit clock reading.
    pub fn check_at(&self, lens: AgentLens, now: Instant) -> RateDecision {
        let mut windows = self.lock();
        let entries = windows.entry(lens).or_default();

        while let Some(&oldest) = entries.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.limit {
            let retry_after = entries
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window);
            return RateDecision::Limited {
                retry_after,
                count: entries.len(),
            };
        }

        entries.push_back(now);
        RateDecision::Allowed {
            count: entries.len(),
        }
    }

    /// Clear the window for `lens` unconditionally.
    pub fn reset(&self, lens: AgentLens) -> usize {
        self.lock().remove(&lens).map(|w| w.len()).unwrap_or(0)
    }

    /// Current window for `lens`, without pruning.
    pub fn status(&self, lens: AgentLens) -> RateWindowStatus {
        self.status_at(lens, Instant::now())
    }

    pub fn status_at(&self, lens: AgentLens, now: Instant) -> RateWindowStatus {
        let windows = self.lock();
        let live: Vec<Instant> = windows
            .get(&lens)
            .map(|entries| {
                entries
                    .iter()
                    .copied()
                    .filter(|&t| now.saturating_duration_since(t) < self.window)
                    .collect()
            })
            .unwrap_or_default();

        let resets_in_seconds = live.first().map(|&oldest| {
            self.window
                .saturating_sub(now.saturating_duration_since(oldest))
                .as_secs_f64()
        });

        RateWindowStatus {
            agent_lens: lens,
            count: live.len(),
            limit: self.limit,
            remaining: self.limit.saturating_sub(live.len()),
            window_seconds: self.window.as_secs(),
            resets_in_seconds,
        }
    }

    /// Status for every lens in vocabulary order.
    pub fn status_all(&self) -> Vec<RateWindowStatus> {
        let now = Instant::now();
        AgentLens::all()
            .iter()
            .map(|&lens| self.status_at(lens, now))
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(ops: usize, secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            ops_per_window: ops,
            window_seconds: secs,
        })
    }

    #[test]
    fn test_sixth_call_is_limited() {
        let rl = RateLimiter::default();
        let t0 = Instant::now();
        for i in 0..5 {
            let d = rl.check_at(AgentLens::Skeptical, t0 + Duration::from_secs(i));
            assert_eq!(d, RateDecision::Allowed { count: i as usize + 1 });
        }
        let d = rl.check_at(AgentLens::Skeptical, t0 + Duration::from_secs(10));
        assert!(!d.is_allowed());
        assert_eq!(d.retry_after_secs(), 50);
    }

    #[test]
    fn test_lenses_are_independent() {
        let rl = limiter(1, 60);
        let t0 = Instant::now();
        assert!(rl.check_at(AgentLens::Creative, t0).is_allowed());
        assert!(!rl.check_at(AgentLens::Creative, t0).is_allowed());
        assert!(rl.check_at(AgentLens::Ethical, t0).is_allowed());
    }

    #[test]
    fn test_window_slides() {
        let rl = limiter(2, 10);
        let t0 = Instant::now();
        assert!(rl.check_at(AgentLens::Analytical, t0).is_allowed());
        assert!(rl
            .check_at(AgentLens::Analytical, t0 + Duration::from_secs(5))
            .is_allowed());
        assert!(!rl
            .check_at(AgentLens::Analytical, t0 + Duration::from_secs(9))
            .is_allowed());
        // First entry expires exactly at the window boundary
        assert!(rl
            .check_at(AgentLens::Analytical, t0 + Duration::from_secs(10))
            .is_allowed());
    }

    #[test]
    fn test_rejection_is_not_recorded() {
        let rl = limiter(1, 10);
        let t0 = Instant::now();
        rl.check_at(AgentLens::Pragmatic, t0);
        for s in 1..5 {
            rl.check_at(AgentLens::Pragmatic, t0 + Duration::from_secs(s));
        }
        assert!(rl
            .check_at(AgentLens::Pragmatic, t0 + Duration::from_secs(10))
            .is_allowed());
    }

    #[test]
    fn test_reset_clears_window() {
        let rl = limiter(1, 60);
        let t0 = Instant::now();
        rl.check_at(AgentLens::Skeptical, t0);
        assert!(!rl.check_at(AgentLens::Skeptical, t0).is_allowed());
        assert_eq!(rl.reset(AgentLens::Skeptical), 1);
        assert!(rl.check_at(AgentLens::Skeptical, t0).is_allowed());
        assert_eq!(rl.reset(AgentLens::Ethical), 0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let d = RateDecision::Limited {
            retry_after: Duration::from_millis(1500),
            count: 5,
        };
        assert_eq!(d.retry_after_secs(), 2);
        let d = RateDecision::Limited {
            retry_after: Duration::ZERO,
            count: 5,
        };
        assert_eq!(d.retry_after_secs(), 1);
    }

    #[test]
    fn test_status_does_not_mutate() {
        let rl = limiter(3, 60);
        let t0 = Instant::now();
        rl.check_at(AgentLens::Creative, t0);
        rl.check_at(AgentLens::Creative, t0 + Duration::from_secs(1));

        let status = rl.status_at(AgentLens::Creative, t0 + Duration::from_secs(2));
        assert_eq!(status.count, 2);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.window_seconds, 60);
        assert_eq!(status.resets_in_seconds, Some(58.0));

        let later = rl.status_at(AgentLens::Creative, t0 + Duration::from_secs(120));
        assert_eq!(later.count, 0);
        assert_eq!(later.resets_in_seconds, None);
        assert_eq!(rl.status_at(AgentLens::Creative, t0).count, 2);
        assert_eq!(rl.status_all().len(), 5);
    }
}
