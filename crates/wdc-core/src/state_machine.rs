//! Coordinator state machine
//!
//! ```text
//! Idle -> Running(n) -> Advancing(n) -> Running(n+1) | Finished
//!                    -> Held(n)      -> Running(n)   | Finished
//!                    -> Aborted
//! ```
//!
//! `Finished` and `Aborted` are terminal. A cancellation observed between
//! waves moves any non-terminal state straight to `Aborted`.

use crate::error::StateMachineError;
use crate::types::WaveNumber;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "wave")]
pub enum CoordinatorState {
    /// Holding the full wave list, nothing started
    Idle,
    /// Wave in flight
    Running(WaveNumber),
    /// Wave advanced; moving on
    Advancing(WaveNumber),
    /// Wave held; about to retry
    Held(WaveNumber),
    /// Halted by a fault, exhausted retries or cancellation
    Aborted,
    /// All waves processed, or halted gracefully
    Finished,
}

impl CoordinatorState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Finished)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running(n) => write!(f, "running({n})"),
            Self::Advancing(n) => write!(f, "advancing({n})"),
            Self::Held(n) => write!(f, "held({n})"),
            Self::Aborted => f.write_str("aborted"),
            Self::Finished => f.write_str("finished"),
        }
    }
}

/// Validates a state transition.
///
/// # Errors
/// Returns `IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(
    from: CoordinatorState,
    to: CoordinatorState,
) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition {
            current: from,
            requested: to,
        })
    }
}

fn allowed(from: CoordinatorState, to: CoordinatorState) -> bool {
    use CoordinatorState::*;
    match (from, to) {
        (Idle, Running(_) | Finished | Aborted) => true,
        (Running(n), Advancing(m) | Held(m)) => n == m,
        (Running(_), Aborted) => true,
        (Advancing(n), Running(m)) => m > n,
        (Advancing(_), Finished | Aborted) => true,
        (Held(n), Running(m)) => n == m,
        (Held(_), Finished | Aborted) => true,
        _ => false,
    }
}

/// Tracks the current coordinator state and rejects illegal moves
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: CoordinatorState,
    history: Vec<CoordinatorState>,
}

impl StateMachine {
    /// Start in `Idle`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: CoordinatorState::Idle,
            history: vec![CoordinatorState::Idle],
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn current(&self) -> CoordinatorState {
        self.current
    }

    /// Every state visited, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[CoordinatorState] {
        &self.history
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns `IllegalTransition` and leaves the state unchanged if the move
    /// is not permitted.
    pub fn transition(&mut self, to: CoordinatorState) -> Result<(), StateMachineError> {
        validate_transition(self.current, to)?;
        tracing::trace!(from = %self.current, to = %to, "coordinator transition");
        self.current = to;
        self.history.push(to);
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: u32) -> WaveNumber {
        WaveNumber::new(n).unwrap()
    }

    #[test]
    fn idle_transitions() {
        use CoordinatorState::*;
        assert!(validate_transition(Idle, Running(wave(1))).is_ok());
        assert!(validate_transition(Idle, Aborted).is_ok());
        assert!(validate_transition(Idle, Advancing(wave(1))).is_err());
    }

    #[test]
    fn running_settles_same_wave_only() {
        use CoordinatorState::*;
        assert!(validate_transition(Running(wave(2)), Advancing(wave(2))).is_ok());
        assert!(validate_transition(Running(wave(2)), Held(wave(2))).is_ok());
        assert!(validate_transition(Running(wave(2)), Held(wave(3))).is_err());
        assert!(validate_transition(Running(wave(2)), Finished).is_err());
    }

    #[test]
    fn advancing_only_moves_forward() {
        use CoordinatorState::*;
        assert!(validate_transition(Advancing(wave(1)), Running(wave(2))).is_ok());
        assert!(validate_transition(Advancing(wave(2)), Running(wave(2))).is_err());
        assert!(validate_transition(Advancing(wave(2)), Running(wave(1))).is_err());
    }

    #[test]
    fn held_retries_same_wave() {
        use CoordinatorState::*;
        assert!(validate_transition(Held(wave(1)), Running(wave(1))).is_ok());
        assert!(validate_transition(Held(wave(1)), Running(wave(2))).is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        use CoordinatorState::*;
        for to in [Idle, Running(wave(1)), Finished, Aborted] {
            assert!(validate_transition(Finished, to).is_err());
            assert!(validate_transition(Aborted, to).is_err());
        }
        assert!(Finished.is_terminal());
        assert!(!Held(wave(1)).is_terminal());
    }

    #[test]
    fn machine_records_history_and_rejects() {
        use CoordinatorState::*;
        let mut sm = StateMachine::new();
        sm.transition(Running(wave(1))).unwrap();
        sm.transition(Held(wave(1))).unwrap();
        sm.transition(Running(wave(1))).unwrap();
        sm.transition(Advancing(wave(1))).unwrap();
        sm.transition(Finished).unwrap();

        assert!(sm.transition(Running(wave(2))).is_err());
        assert_eq!(sm.current(), Finished);
        assert_eq!(sm.history().len(), 6);
    }
}
