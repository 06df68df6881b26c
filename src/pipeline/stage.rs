//! Per-stage lifecycle tracking within a run

use crate::assessment::StageRole;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{trace, warn};

/// Lifecycle of one stage within a run
///
/// `Pending -> CacheHit -> Done` or
/// `Pending -> Dispatched -> (Succeeded | Fallback) -> Done`. Retries happen
/// inside a dispatch and do not leave `Dispatched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    CacheHit,
    Dispatched,
    Succeeded,
    Fallback,
    Done,
}

impl StageState {
    pub fn can_advance_to(self, next: StageState) -> bool {
        use StageState::*;
        matches!(
            (self, next),
            (Pending, CacheHit)
                | (Pending, Dispatched)
                | (Pending, Fallback)
                | (Dispatched, Succeeded)
                | (Dispatched, Fallback)
                | (CacheHit, Done)
                | (Succeeded, Done)
                | (Fallback, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == StageState::Done
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Pending => "pending",
            StageState::CacheHit => "cache_hit",
            StageState::Dispatched => "dispatched",
            StageState::Succeeded => "succeeded",
            StageState::Fallback => "fallback",
            StageState::Done => "done",
        };
        f.write_str(name)
    }
}

/// States of every role in one run
#[derive(Debug, Clone)]
pub struct StageTracker {
    states: BTreeMap<StageRole, StageState>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            states: StageRole::ALL
                .iter()
                .map(|role| (*role, StageState::Pending))
                .collect(),
        }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, role: StageRole) -> StageState {
        self.states
            .get(&role)
            .copied()
            .unwrap_or(StageState::Pending)
    }

    /// Moves `role` to `next`; illegal transitions are logged and ignored
    pub fn advance(&mut self, role: StageRole, next: StageState) -> bool {
        let current = self.state(role);
        if !current.can_advance_to(next) {
            warn!(role = %role, from = %current, to = %next, "Ignoring illegal stage transition");
            return false;
        }
        trace!(role = %role, from = %current, to = %next, "Stage transition");
        self.states.insert(role, next);
        true
    }

    /// True once every role in `roles` is done
    pub fn all_done(&self, roles: &[StageRole]) -> bool {
        roles.iter().all(|role| self.state(*role).is_terminal())
    }
}
