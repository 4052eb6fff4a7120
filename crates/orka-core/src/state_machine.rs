use std::collections::HashMap;
use std::hash::Hash;

use orka_types::OrkaError;

/// Outcome of a single transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// A generic entity state-transition kernel, parameterized by state type
/// `S` and event type `E`. Configuration is a table mapping
/// `(state, event) -> next-state`; side effects are supplied as closures run
/// by the caller around `transition` (`onExit` before, `onEntry` after),
/// since the hooks often need access to data the kernel itself doesn't own
/// (e.g. a Storage handle).
pub struct StateMachine<S, E> {
    table: HashMap<(S, E), S>,
    entity_kind: &'static str,
}

impl<S, E> StateMachine<S, E>
where
    S: Eq + Hash + Clone + std::fmt::Debug,
    E: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(entity_kind: &'static str) -> Self {
        StateMachine {
            table: HashMap::new(),
            entity_kind,
        }
    }

    pub fn allow(mut self, from: S, event: E, to: S) -> Self {
        self.table.insert((from, event), to);
        self
    }

    /// Validates the transition without committing it, so callers can run
    /// `onExit`/`onEntry` hooks around a persistence write and have the whole
    /// sequence roll back atomically on hook failure.
    pub fn check(&self, from: &S, event: &E) -> Result<S, OrkaError> {
        self.table
            .get(&(from.clone(), event.clone()))
            .cloned()
            .ok_or_else(|| {
                OrkaError::invalid_transition(
                    self.entity_kind,
                    "unknown",
                    format!("{from:?}"),
                    format!("{event:?}"),
                )
            })
    }

    pub fn is_allowed(&self, from: &S, event: &E) -> bool {
        self.table.contains_key(&(from.clone(), event.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
        Yellow,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Go {
        Advance,
    }

    fn traffic_light() -> StateMachine<Light, Go> {
        StateMachine::new("traffic_light")
            .allow(Light::Red, Go::Advance, Light::Green)
            .allow(Light::Green, Go::Advance, Light::Yellow)
            .allow(Light::Yellow, Go::Advance, Light::Red)
    }

    #[test]
    fn allowed_transition_returns_next_state() {
        let sm = traffic_light();
        assert_eq!(sm.check(&Light::Red, &Go::Advance).unwrap(), Light::Green);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let sm = StateMachine::<Light, Go>::new("traffic_light")
            .allow(Light::Red, Go::Advance, Light::Green);
        let err = sm.check(&Light::Green, &Go::Advance).unwrap_err();
        assert!(matches!(err, OrkaError::InvalidTransition { .. }));
    }
}
