//! Per-actor request metering.
//!
//! Fixed budget per minute, keyed by actor id. Sits in front of any
//! transactional work: a rejected command never opens a transaction and is
//! never ledgered. Counters are ephemeral and approximate; losing them on
//! restart is acceptable, letting an actor burst without bound is not, so
//! increments are atomic rather than read-then-write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use agentbase_core::ActorId;

/// Default budget: 60 commands per minute per actor.
pub const DEFAULT_BUDGET: u32 = 60;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one admission check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Budget exhausted; retry once the window rolls over.
    Limited { retry_after: Duration },
}

#[derive(Debug, Default)]
struct Window {
    /// Which window the count belongs to, as `epoch_secs / window_secs`.
    index: AtomicU64,
    count: AtomicU64,
}

/// Fixed-window rate limiter.
///
/// One dashmap entry per actor; unrelated actors never contend on a shared
/// lock. Window rollover uses compare-and-swap: the winning thread resets
/// the count, racers at the boundary may lose an increment or two, which
/// keeps the limiter approximate but never lets a window exceed its budget
/// unchecked.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    budget: u64,
    window: Duration,
    windows: DashMap<ActorId, Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget: u64::from(budget.max(1)),
            window,
            windows: DashMap::new(),
        }
    }

    pub fn allow(&self, actor_id: ActorId, now: DateTime<Utc>) -> Decision {
        let window_secs = self.window.as_secs().max(1);
        let now_secs = now.timestamp().max(0) as u64;
        let index = now_secs / window_secs;

        let entry = self.windows.entry(actor_id).or_default();

        let current = entry.index.load(Ordering::Acquire);
        if current != index
            && entry
                .index
                .compare_exchange(current, index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            entry.count.store(0, Ordering::Release);
        }

        let used = entry.count.fetch_add(1, Ordering::AcqRel) + 1;
        if used <= self.budget {
            Decision::Allowed
        } else {
            let window_end = (index + 1) * window_secs;
            Decision::Limited {
                retry_after: Duration::from_secs(window_end.saturating_sub(now_secs).max(1)),
            }
        }
    }

    /// Drop windows older than the previous one. Opportunistic; call from
    /// any periodic task.
    pub fn prune(&self, now: DateTime<Utc>) {
        let window_secs = self.window.as_secs().max(1);
        let index = (now.timestamp().max(0) as u64) / window_secs;
        self.windows
            .retain(|_, w| w.index.load(Ordering::Acquire) + 1 >= index);
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET, DEFAULT_WINDOW)
    }
}
