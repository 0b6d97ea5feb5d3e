//! Agent lifecycle
//!
//! ```text
//! Uninitialized → Configured → Hooked → Active → ShuttingDown → Terminated
//!                                  └──────────────────┘
//! ```
//!
//! Transitions only move forward. `Hooked` may go straight to shutdown when
//! the helper class could not be installed. Shutdown can be requested from
//! any earlier state and is claimed by exactly one caller.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AgentState {
    Uninitialized = 0,
    /// Configuration resolved and frozen
    Configured = 1,
    /// Load hook and lifecycle events registered
    Hooked = 2,
    /// Helper class installed; classes are rewritten and calls traced
    Active = 3,
    ShuttingDown = 4,
    Terminated = 5,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Configured,
            2 => Self::Hooked,
            3 => Self::Active,
            4 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically stored [`AgentState`]
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: AtomicU8::new(AgentState::Uninitialized as u8) }
    }

    #[must_use]
    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == AgentState::Active
    }

    /// Move from `from` to `to`; `false` if the state was not `from` or the
    /// move would go backwards
    pub fn advance(&self, from: AgentState, to: AgentState) -> bool {
        if to <= from {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the shutdown. Returns `true` for exactly one caller; everyone
    /// else (and any call after shutdown started) gets `false`.
    pub fn begin_shutdown(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if AgentState::from_u8(current) >= AgentState::ShuttingDown {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                AgentState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the shutdown complete
    pub fn finish_shutdown(&self) {
        self.advance(AgentState::ShuttingDown, AgentState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_forward_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), AgentState::Uninitialized);

        assert!(lifecycle.advance(AgentState::Uninitialized, AgentState::Configured));
        assert!(lifecycle.advance(AgentState::Configured, AgentState::Hooked));
        assert!(!lifecycle.is_active());
        assert!(lifecycle.advance(AgentState::Hooked, AgentState::Active));
        assert!(lifecycle.is_active());

        assert!(lifecycle.begin_shutdown());
        lifecycle.finish_shutdown();
        assert_eq!(lifecycle.state(), AgentState::Terminated);
    }

    #[test]
    fn test_no_backward_or_stale_transitions() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(AgentState::Uninitialized, AgentState::Configured));

        assert!(!lifecycle.advance(AgentState::Configured, AgentState::Uninitialized));
        assert!(!lifecycle.advance(AgentState::Hooked, AgentState::Active));
        assert_eq!(lifecycle.state(), AgentState::Configured);

        assert!(lifecycle.begin_shutdown());
        assert!(!lifecycle.advance(AgentState::Configured, AgentState::Hooked));
        assert!(!lifecycle.advance(AgentState::ShuttingDown, AgentState::Configured));
    }

    #[test]
    fn test_shutdown_is_claimed_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.advance(AgentState::Uninitialized, AgentState::Configured);
        lifecycle.advance(AgentState::Configured, AgentState::Hooked);
        lifecycle.advance(AgentState::Hooked, AgentState::Active);

        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if lifecycle.begin_shutdown() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), AgentState::ShuttingDown);
        assert!(!lifecycle.begin_shutdown());
    }

    #[test]
    fn test_shutdown_from_hooked() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(AgentState::Uninitialized, AgentState::Configured);
        lifecycle.advance(AgentState::Configured, AgentState::Hooked);

        assert!(lifecycle.begin_shutdown());
        lifecycle.finish_shutdown();
        assert_eq!(lifecycle.state(), AgentState::Terminated);
        lifecycle.finish_shutdown();
        assert_eq!(lifecycle.state(), AgentState::Terminated);
    }
}
