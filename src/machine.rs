//! The transition engine.
//!
//! One `process_event` call resolves and applies exactly one transition:
//!
//! 1. walk up from the active leaf to the first node handling the event
//! 2. resolve guards, then descend composites and junctions to a leaf
//! 3. compute the lowest common ancestor of source and destination
//! 4. run the hook sequence: before, exits (nearest first, recording
//!    history), during, entries (outermost first), commit, after, enforce
//!    (leaf to root, then machine)
//!
//! The whole call runs under a reentrant lock, so hooks may fire further
//! events on the same machine and other threads queue behind the in-flight
//! transition.

use crate::chart::{Chart, EntryMode, NodeId, NodeKind, Target};
use crate::error::EngineError;
use crate::event::EventId;
use crate::guard::Hook;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

/// What one `process_event` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Leaf the machine was in when the event arrived.
    pub from: NodeId,
    /// Leaf the machine is in now. Equals `from` for internal transitions.
    pub to: NodeId,
    /// False when the event resolved to an internal transition.
    pub applied: bool,
}

/// History slots of one composite, written on every exit through it.
#[derive(Debug, Clone, Copy, Default)]
struct HistorySlot {
    /// Direct child last exited through.
    shallow: Option<NodeId>,
    /// Exact leaf last active below the composite.
    deep: Option<NodeId>,
}

struct RuntimeState {
    current: NodeId,
    /// Indexed by node; only composite entries are ever written.
    history: Vec<HistorySlot>,
}

/// A running statechart: one chart, one active leaf, one lock.
pub struct StateMachine {
    name: String,
    chart: Chart,
    // Reentrant lock around RefCell'd runtime state: nested process_event
    // from a hook re-acquires on the same thread, other threads block.
    // Borrows are scoped strictly between callback invocations.
    runtime: ReentrantMutex<RefCell<RuntimeState>>,
    on_enforce: Option<Hook>,
}

impl StateMachine {
    /// Validates the chart and binds the machine to `initial`, resolving a
    /// composite (or junction) initial node to its leaf with empty history.
    /// No hooks fire during construction.
    pub fn new(chart: Chart, initial: NodeId) -> Result<Self, EngineError> {
        chart.validate(initial)?;

        let empty = |_: NodeId| HistorySlot::default();
        let current = descend(&chart, "machine", &empty, initial, false);
        let history = vec![HistorySlot::default(); chart.nodes.len()];

        Ok(Self {
            name: "machine".to_string(),
            chart,
            runtime: ReentrantMutex::new(RefCell::new(RuntimeState { current, history })),
            on_enforce: None,
        })
    }

    /// Names the machine for trace output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Installs the machine-level enforce hook, fired last in every
    /// enforce phase.
    pub fn on_enforce(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_enforce = Some(Box::new(hook));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active leaf.
    pub fn current_state(&self) -> NodeId {
        let runtime = self.runtime.lock();
        let current = runtime.borrow().current;
        current
    }

    /// Name of the active leaf.
    pub fn current_state_name(&self) -> &str {
        self.chart.name(self.current_state())
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    /// Mutable access to the owned chart, e.g. for late transition-table
    /// edits. Exclusivity against in-flight transitions is the caller's
    /// responsibility; the engine does not synchronize graph mutation.
    pub fn chart_mut(&mut self) -> &mut Chart {
        &mut self.chart
    }

    /// Resolves and applies one transition for `event`.
    ///
    /// The only engine-raised failure is [`EngineError::EventNotHandled`],
    /// raised before any hook runs. Hook panics propagate to the caller
    /// with the machine left at whatever step the transition had reached.
    pub fn process_event(&self, event: EventId) -> Result<TransitionOutcome, EngineError> {
        let runtime = self.runtime.lock();

        let origin = runtime.borrow().current;

        // Find the handling node, walking rootward from the leaf.
        let mut handler = origin;
        let target = loop {
            if let Some(target) = self.chart.nodes[handler.0].transitions.get(&event) {
                break target;
            }
            match self.chart.nodes[handler.0].parent {
                Some(parent) => handler = parent,
                None => {
                    return Err(EngineError::EventNotHandled {
                        state: self.chart.name(origin).to_string(),
                        event: self.chart.event_name(event).to_string(),
                    });
                }
            }
        };
        tracing::trace!(
            "{}: '{}' handled by '{}' for leaf '{}'",
            self.name,
            self.chart.event_name(event),
            self.chart.name(handler),
            self.chart.name(origin)
        );

        // A guard resolves to its destination, or to no transition.
        let proxy = match target {
            Target::Node(id) => Some(*id),
            Target::Guarded(guard) => guard.evaluate(),
            Target::Internal => None,
        };

        // Internal transition: no hooks, no state change, no history
        // writes.
        let Some(proxy) = proxy else {
            tracing::debug!(
                "{}: '{}' consumed internally in '{}'",
                self.name,
                self.chart.event_name(event),
                self.chart.name(origin)
            );
            return Ok(TransitionOutcome {
                from: origin,
                to: origin,
                applied: false,
            });
        };

        // Descend composites and junctions to the destination leaf.
        let slot_of = |id: NodeId| runtime.borrow().history[id.0];
        let dest = descend(&self.chart, &self.name, &slot_of, proxy, true);

        // Ancestor chains and the lowest common ancestor. A
        // self-transition pivots on its own parent: full exit/enter cycle,
        // never a no-op.
        let origin_ancestry = self.chart.ancestry(origin);
        let dest_ancestry = self.chart.ancestry(dest);
        let lca = if origin == dest {
            self.chart.parent(origin)
        } else {
            self.chart.common_ancestor(origin, dest)
        };
        tracing::trace!(
            "{}: origin ancestry {:?}, destination ancestry {:?}, lca {:?}",
            self.name,
            self.names(&origin_ancestry),
            self.names(&dest_ancestry),
            lca.map(|id| self.chart.name(id))
        );

        self.fire_event_hook(event, "before", &self.chart.events[event.0].on_before);

        // Exit from the leaf up to (excluding) the LCA. Every composite
        // exited through gets its history slots written, whatever its
        // entry mode.
        let mut exit_chain = vec![origin];
        exit_chain.extend(
            origin_ancestry
                .iter()
                .copied()
                .take_while(|id| Some(*id) != lca),
        );
        for (i, &node) in exit_chain.iter().enumerate() {
            self.fire_exit(node);
            if i > 0 {
                let mut state = runtime.borrow_mut();
                let slot = &mut state.history[node.0];
                slot.deep = Some(origin);
                slot.shallow = Some(exit_chain[i - 1]);
                drop(state);
                tracing::trace!(
                    "{}: history of '{}' set to deep '{}', shallow '{}'",
                    self.name,
                    self.chart.name(node),
                    self.chart.name(origin),
                    self.chart.name(exit_chain[i - 1])
                );
            }
        }

        self.fire_event_hook(event, "during", &self.chart.events[event.0].on_during);

        // Enter from below the LCA down to the leaf.
        let entry_chain: Vec<NodeId> = dest_ancestry
            .iter()
            .copied()
            .take_while(|id| Some(*id) != lca)
            .collect();
        for &node in entry_chain.iter().rev() {
            self.fire_entry(node);
        }
        self.fire_entry(dest);

        // Commit.
        runtime.borrow_mut().current = dest;

        self.fire_event_hook(event, "after", &self.chart.events[event.0].on_after);

        // Enforce from the new leaf to the root, then the machine.
        self.fire_enforce(dest);
        for &node in &dest_ancestry {
            self.fire_enforce(node);
        }
        if let Some(hook) = &self.on_enforce {
            tracing::trace!("{}: machine enforce", self.name);
            hook();
        }

        tracing::debug!(
            "{}: '{}' --{}--> '{}'",
            self.name,
            self.chart.name(origin),
            self.chart.event_name(event),
            self.chart.name(dest)
        );

        Ok(TransitionOutcome {
            from: origin,
            to: dest,
            applied: true,
        })
    }

    fn fire_entry(&self, node: NodeId) {
        tracing::trace!("{}: enter '{}'", self.name, self.chart.name(node));
        if let Some(hook) = &self.chart.nodes[node.0].on_entry {
            hook();
        }
    }

    fn fire_exit(&self, node: NodeId) {
        tracing::trace!("{}: exit '{}'", self.name, self.chart.name(node));
        if let Some(hook) = &self.chart.nodes[node.0].on_exit {
            hook();
        }
    }

    fn fire_enforce(&self, node: NodeId) {
        tracing::trace!("{}: enforce '{}'", self.name, self.chart.name(node));
        if let Some(hook) = &self.chart.nodes[node.0].on_enforce {
            hook();
        }
    }

    fn fire_event_hook(&self, event: EventId, phase: &str, hook: &Option<Hook>) {
        tracing::trace!(
            "{}: {} '{}'",
            self.name,
            phase,
            self.chart.event_name(event)
        );
        if let Some(hook) = hook {
            hook();
        }
    }

    fn names(&self, chain: &[NodeId]) -> Vec<&str> {
        chain.iter().map(|&id| self.chart.name(id)).collect()
    }
}

/// Transition-target descent: replaces composites per their entry mode and scans
/// junction branches until a leaf-capable node remains. Junction hooks fire
/// exactly once as control passes through; the transition routine is never
/// re-entered for them.
fn descend(
    chart: &Chart,
    machine: &str,
    slot_of: &dyn Fn(NodeId) -> HistorySlot,
    start: NodeId,
    fire_hooks: bool,
) -> NodeId {
    let mut node = start;
    loop {
        match &chart.nodes[node.0].kind {
            NodeKind::Junction { default, branches } => {
                if fire_hooks {
                    if let Some(hook) = &chart.nodes[node.0].on_entry {
                        hook();
                    }
                }
                let mut chosen = *default;
                let mut taken = None;
                for (i, (predicate, dest)) in branches.iter().enumerate() {
                    if predicate() {
                        chosen = *dest;
                        taken = Some(i);
                        break;
                    }
                }
                match taken {
                    Some(i) => tracing::trace!(
                        "{}: junction '{}' took branch {} to '{}'",
                        machine,
                        chart.name(node),
                        i,
                        chart.name(chosen)
                    ),
                    None => tracing::trace!(
                        "{}: junction '{}' fell through to default '{}'",
                        machine,
                        chart.name(node),
                        chart.name(chosen)
                    ),
                }
                if fire_hooks {
                    if let Some(hook) = &chart.nodes[node.0].on_exit {
                        hook();
                    }
                    if let Some(hook) = &chart.nodes[node.0].on_enforce {
                        hook();
                    }
                }
                node = chosen;
            }
            NodeKind::Composite {
                starting: Some(starting),
                entry_mode,
                children,
            } if !children.is_empty() => {
                let slot = slot_of(node);
                // Empty history falls back to starting-state semantics. A
                // shallow slot re-resolves by the child's own entry mode on
                // the next pass; a deep slot is already a leaf.
                let next = match entry_mode {
                    EntryMode::StartingState => *starting,
                    EntryMode::ShallowHistory => slot.shallow.unwrap_or(*starting),
                    EntryMode::DeepHistory => slot.deep.unwrap_or(*starting),
                };
                tracing::trace!(
                    "{}: composite '{}' ({:?}) resolves to '{}'",
                    machine,
                    chart.name(node),
                    entry_mode,
                    chart.name(next)
                );
                node = next;
            }
            _ => break node,
        }
    }
}
