//! Event identities and lifecycle hooks.

use crate::guard::Hook;

/// Handle to an event registered in a [`Chart`](crate::Chart).
///
/// Events are stateless with respect to any machine: the same id may label
/// transitions in any number of states within its chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub(crate) usize);

/// Arena entry backing an [`EventId`].
pub(crate) struct EventData {
    pub(crate) name: String,
    pub(crate) description: String,
    /// Fires before any exit action.
    pub(crate) on_before: Option<Hook>,
    /// Fires between the exit and entry phases.
    pub(crate) on_during: Option<Hook>,
    /// Fires after the destination leaf is committed.
    pub(crate) on_after: Option<Hook>,
}

impl EventData {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            on_before: None,
            on_during: None,
            on_after: None,
        }
    }
}
