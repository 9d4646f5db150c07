//! Guards and transition callbacks.
//!
//! A [`Guard`] sits in a transition table in place of a plain destination:
//! when the event fires, the guard's predicate decides between the wrapped
//! destination and no transition at all. Predicates are caller closures and
//! may read arbitrary external state; the engine treats them as
//! side-effect-free.

use crate::chart::NodeId;
use std::fmt;

/// Lifecycle hook invoked during a transition.
pub type Hook = Box<dyn Fn() + Send + Sync>;

/// Predicate evaluated for guarded transitions and junction branches.
pub type Predicate = Box<dyn Fn() -> bool + Send + Sync>;

/// A conditional transition target: one predicate plus one destination.
pub struct Guard {
    predicate: Predicate,
    destination: NodeId,
}

impl Guard {
    /// Creates a guard that transitions to `destination` when `predicate`
    /// holds.
    pub fn new(destination: NodeId, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            destination,
        }
    }

    /// Returns the wrapped destination if the predicate holds.
    ///
    /// `None` is the internal-transition sentinel, not an error: a false
    /// guard means the event was handled with no observable effect.
    pub fn evaluate(&self) -> Option<NodeId> {
        if (self.predicate)() {
            Some(self.destination)
        } else {
            None
        }
    }

    /// The destination this guard protects.
    pub fn destination(&self) -> NodeId {
        self.destination
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}
