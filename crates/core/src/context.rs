//! Per-call operation context.
//!
//! Every public engine operation receives an explicit [`OperationContext`]
//! instead of reaching for a global "current user" or wall clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::id::UserId;

/// Source of business time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant (tests, replays).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Who is acting, and what time it is for them.
#[derive(Clone)]
pub struct OperationContext {
    pub actor: UserId,
    clock: Arc<dyn Clock>,
}

impl OperationContext {
    pub fn new(actor: UserId, clock: Arc<dyn Clock>) -> Self {
        Self { actor, clock }
    }

    /// Context using the system clock.
    pub fn system(actor: UserId) -> Self {
        Self::new(actor, Arc::new(SystemClock))
    }

    /// Context frozen at `at`.
    pub fn at(actor: UserId, at: DateTime<Utc>) -> Self {
        Self::new(actor, Arc::new(FixedClock(at)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Same clock, different actor.
    pub fn with_actor(&self, actor: UserId) -> Self {
        Self {
            actor,
            clock: self.clock.clone(),
        }
    }
}

impl core::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperationContext")
            .field("actor", &self.actor)
            .field("now", &self.clock.now())
            .finish()
    }
}
