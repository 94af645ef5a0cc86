//! Resource limits for embedded execution.
//!
//! A session can run unlimited (the REPL default) or with a tracker that
//! bounds heap slots, estimated bytes, and evaluator recursion depth.
//! Exceeding a limit surfaces as a resource error, which the evaluator
//! converts into an ordinary raised error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default bound on evaluator recursion depth.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Limits applied by a [`Tracker::Limited`] tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum live heap slots.
    pub max_heap_slots: Option<usize>,
    /// Maximum estimated heap bytes.
    pub max_memory_bytes: Option<usize>,
    /// Maximum evaluator recursion depth.
    pub max_recursion_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_heap_slots: None,
            max_memory_bytes: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

/// A resource limit was exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceError {
    HeapSlots { limit: usize },
    Memory { limit: usize },
    RecursionDepth { limit: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeapSlots { limit } => write!(f, "heap slot limit of {limit} exceeded"),
            Self::Memory { limit } => write!(f, "memory limit of {limit} bytes exceeded"),
            Self::RecursionDepth { limit } => write!(f, "recursion depth limit of {limit} exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Allocation accounting, checked on every heap allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Tracker {
    /// No accounting at all.
    NoLimit,
    Limited {
        limits: ResourceLimits,
        live_slots: usize,
        live_bytes: usize,
    },
}

impl Tracker {
    #[must_use]
    pub fn limited(limits: ResourceLimits) -> Self {
        Self::Limited {
            limits,
            live_slots: 0,
            live_bytes: 0,
        }
    }

    /// Records an allocation of roughly `bytes`, failing if a limit trips.
    pub fn on_allocate(&mut self, bytes: usize) -> Result<(), ResourceError> {
        match self {
            Self::NoLimit => Ok(()),
            Self::Limited {
                limits,
                live_slots,
                live_bytes,
            } => {
                if let Some(max) = limits.max_heap_slots
                    && *live_slots + 1 > max
                {
                    return Err(ResourceError::HeapSlots { limit: max });
                }
                if let Some(max) = limits.max_memory_bytes
                    && *live_bytes + bytes > max
                {
                    return Err(ResourceError::Memory { limit: max });
                }
                *live_slots += 1;
                *live_bytes += bytes;
                Ok(())
            }
        }
    }

    pub fn on_free(&mut self, bytes: usize) {
        if let Self::Limited {
            live_slots, live_bytes, ..
        } = self
        {
            *live_slots = live_slots.saturating_sub(1);
            *live_bytes = live_bytes.saturating_sub(bytes);
        }
    }

    #[must_use]
    pub fn max_recursion_depth(&self) -> usize {
        match self {
            Self::NoLimit => DEFAULT_MAX_RECURSION_DEPTH,
            Self::Limited { limits, .. } => limits.max_recursion_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limit_never_fails() {
        let mut t = Tracker::NoLimit;
        for _ in 0..10_000 {
            t.on_allocate(1 << 20).expect("NoLimit must not fail");
        }
    }

    #[test]
    fn slot_limit_trips() {
        let mut t = Tracker::limited(ResourceLimits {
            max_heap_slots: Some(2),
            max_memory_bytes: None,
            max_recursion_depth: 10,
        });
        t.on_allocate(0).unwrap();
        t.on_allocate(0).unwrap();
        assert_eq!(t.on_allocate(0), Err(ResourceError::HeapSlots { limit: 2 }));
    }

    #[test]
    fn freeing_releases_budget() {
        let mut t = Tracker::limited(ResourceLimits {
            max_heap_slots: Some(1),
            max_memory_bytes: None,
            max_recursion_depth: 10,
        });
        t.on_allocate(8).unwrap();
        t.on_free(8);
        t.on_allocate(8).unwrap();
    }
}
