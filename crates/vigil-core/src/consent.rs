//! Tracking consent
//!
//! The consent state decides whether collected data may ever leave the
//! device. Instead of a process-wide singleton, a [`ConsentProvider`] is owned
//! by the composition root and shared explicitly with the components that
//! need to observe it.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The user's tracking consent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// Data is collected but kept in an intermediary area until a decision is made
    #[default]
    Pending,
    /// Data may be stored and uploaded
    Granted,
    /// Data must be discarded
    NotGranted,
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::Pending => write!(f, "pending"),
            ConsentState::Granted => write!(f, "granted"),
            ConsentState::NotGranted => write!(f, "not_granted"),
        }
    }
}

/// A change of consent, as seen by a single observer
///
/// `previous` is `None` for the initial state an observer starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentTransition {
    pub previous: Option<ConsentState>,
    pub current: ConsentState,
}

impl ConsentTransition {
    /// The transition an observer sees when it is first created
    pub fn initial(current: ConsentState) -> Self {
        Self {
            previous: None,
            current,
        }
    }

    /// A transition between two known states
    pub fn new(previous: ConsentState, current: ConsentState) -> Self {
        Self {
            previous: Some(previous),
            current,
        }
    }

    /// Whether the state actually changed
    pub fn is_change(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// Owner of the current tracking consent
///
/// The provider only records state; components that must react to a change
/// are handed the resulting [`ConsentTransition`] by whoever owns the
/// provider, so reactions can be sequenced on a persistence queue.
#[derive(Debug, Default)]
pub struct ConsentProvider {
    state: RwLock<ConsentState>,
}

impl ConsentProvider {
    /// Create a provider with the given initial consent
    pub fn new(initial: ConsentState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    /// Get the current consent
    pub fn current(&self) -> ConsentState {
        *self.state.read()
    }

    /// Update the consent
    ///
    /// Returns the transition when the value changed, `None` otherwise.
    pub fn update(&self, consent: ConsentState) -> Option<ConsentTransition> {
        let mut state = self.state.write();
        let previous = *state;
        if previous == consent {
            return None;
        }
        *state = consent;
        Some(ConsentTransition::new(previous, consent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pending() {
        assert_eq!(ConsentState::default(), ConsentState::Pending);
        assert_eq!(ConsentProvider::default().current(), ConsentState::Pending);
    }

    #[test]
    fn test_update_returns_transition() {
        let provider = ConsentProvider::new(ConsentState::Pending);

        let transition = provider.update(ConsentState::Granted).unwrap();
        assert_eq!(transition.previous, Some(ConsentState::Pending));
        assert_eq!(transition.current, ConsentState::Granted);
        assert_eq!(provider.current(), ConsentState::Granted);
    }

    #[test]
    fn test_update_same_value_is_ignored() {
        let provider = ConsentProvider::new(ConsentState::NotGranted);
        assert!(provider.update(ConsentState::NotGranted).is_none());
        assert_eq!(provider.current(), ConsentState::NotGranted);
    }

    #[test]
    fn test_transition_is_change() {
        assert!(ConsentTransition::initial(ConsentState::Pending).is_change());
        assert!(ConsentTransition::new(ConsentState::Pending, ConsentState::Granted).is_change());
        assert!(!ConsentTransition::new(ConsentState::Granted, ConsentState::Granted).is_change());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(ConsentState::NotGranted.to_string(), "not_granted");
        let json = serde_json::to_string(&ConsentState::Granted).unwrap();
        assert_eq!(json, "\"granted\"");
    }
}
