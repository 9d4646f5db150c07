//! Statechart definition: the node arena.
//!
//! A [`Chart`] owns every node and event of one statechart. Parent/child
//! references are plain indices ([`NodeId`], [`EventId`]), so the
//! bidirectional tree stays cycle-free under Rust ownership while keeping
//! O(1) navigation both ways. Three node variants share the arena:
//!
//! - plain states: leaf-capable, own a transition table
//! - composites: states that additionally hold children, a starting child,
//!   and a preferred-entry mode
//! - conditional junctions: table-less pseudo-states that redirect control
//!   through an ordered branch list with a mandatory default
//!
//! A chart describes structure only. The active leaf and the history slots
//! are runtime state and belong to the [`StateMachine`](crate::StateMachine)
//! bound to the chart.

use crate::error::EngineError;
use crate::event::{EventData, EventId};
use crate::guard::{Guard, Hook, Predicate};
use std::collections::HashMap;

/// Handle to a node registered in a [`Chart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Per-composite policy selecting how a transition targeting the composite
/// resolves to a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryMode {
    /// Descend through the starting child.
    #[default]
    StartingState,
    /// Re-enter the direct child last active, which then resolves via its
    /// own entry mode.
    ShallowHistory,
    /// Re-enter the exact leaf last active anywhere below this composite.
    DeepHistory,
}

/// A transition-table value.
pub(crate) enum Target {
    /// Direct transition to a node.
    Node(NodeId),
    /// Conditional transition; a false predicate degrades to `Internal`.
    Guarded(Guard),
    /// Handled with no transition: no hooks, no state change.
    Internal,
}

pub(crate) enum NodeKind {
    Simple,
    Composite {
        starting: Option<NodeId>,
        entry_mode: EntryMode,
        children: Vec<NodeId>,
    },
    Junction {
        default: NodeId,
        branches: Vec<(Predicate, NodeId)>,
    },
}

pub(crate) struct NodeData {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) transitions: HashMap<EventId, Target>,
    pub(crate) on_entry: Option<Hook>,
    pub(crate) on_exit: Option<Hook>,
    pub(crate) on_enforce: Option<Hook>,
}

impl NodeData {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parent: None,
            kind,
            transitions: HashMap::new(),
            on_entry: None,
            on_exit: None,
            on_enforce: None,
        }
    }
}

/// A statechart definition: nodes, events, transition tables, and hooks.
#[derive(Default)]
pub struct Chart {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) events: Vec<EventData>,
}

impl Chart {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Registers a plain (leaf-capable) state.
    pub fn state(&mut self, name: impl Into<String>) -> NodeId {
        self.push_node(NodeData::new(name, NodeKind::Simple))
    }

    /// Registers a composite state with no children yet.
    ///
    /// The first child attached via [`Chart::add_child`] becomes the
    /// starting child.
    pub fn composite(&mut self, name: impl Into<String>) -> NodeId {
        self.push_node(NodeData::new(
            name,
            NodeKind::Composite {
                starting: None,
                entry_mode: EntryMode::default(),
                children: Vec::new(),
            },
        ))
    }

    /// Registers a conditional junction with its mandatory default
    /// destination. Branches are appended with [`Chart::branch`].
    pub fn junction(&mut self, name: impl Into<String>, default: NodeId) -> NodeId {
        self.push_node(NodeData::new(
            name,
            NodeKind::Junction {
                default,
                branches: Vec::new(),
            },
        ))
    }

    /// Registers an event.
    pub fn event(&mut self, name: impl Into<String>) -> EventId {
        let id = EventId(self.events.len());
        self.events.push(EventData::new(name));
        id
    }

    /// Attaches a free-form description to a node.
    pub fn describe(&mut self, node: NodeId, text: impl Into<String>) {
        self.nodes[node.0].description = text.into();
    }

    /// Attaches a free-form description to an event.
    pub fn describe_event(&mut self, event: EventId, text: impl Into<String>) {
        self.events[event.0].description = text.into();
    }

    /// Attaches `child` under `parent`.
    ///
    /// The first child attached becomes the parent's starting child.
    /// Attaching to a plain state promotes it to a composite in place,
    /// preserving its identity and transition table, with a warning.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), EngineError> {
        if parent == child {
            return Err(EngineError::invalid_chart(format!(
                "cannot attach '{}' under itself",
                self.name(child)
            )));
        }
        if self.nodes[child.0].parent.is_some() {
            return Err(EngineError::invalid_chart(format!(
                "'{}' already has a parent",
                self.name(child)
            )));
        }
        // Attaching `parent` below `child` elsewhere in the tree would close
        // a cycle.
        if self.ancestry(parent).contains(&child) {
            return Err(EngineError::invalid_chart(format!(
                "attaching '{}' under '{}' would create a cycle",
                self.name(child),
                self.name(parent)
            )));
        }

        if matches!(self.nodes[parent.0].kind, NodeKind::Junction { .. }) {
            return Err(EngineError::invalid_chart(format!(
                "junction '{}' cannot have children",
                self.name(parent)
            )));
        }
        if matches!(self.nodes[parent.0].kind, NodeKind::Simple) {
            tracing::warn!(
                "promoting state '{}' to a composite on first child attach",
                self.name(parent)
            );
            self.nodes[parent.0].kind = NodeKind::Composite {
                starting: None,
                entry_mode: EntryMode::default(),
                children: Vec::new(),
            };
        }

        self.nodes[child.0].parent = Some(parent);
        if let NodeKind::Composite {
            starting, children, ..
        } = &mut self.nodes[parent.0].kind
        {
            children.push(child);
            if starting.is_none() {
                *starting = Some(child);
            }
        }
        Ok(())
    }

    /// Overrides which child a starting-state entry descends through.
    pub fn set_starting_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), EngineError> {
        let parent_name = self.name(parent).to_string();
        match &mut self.nodes[parent.0].kind {
            NodeKind::Composite {
                starting, children, ..
            } if children.contains(&child) => {
                *starting = Some(child);
                Ok(())
            }
            NodeKind::Composite { .. } => Err(EngineError::invalid_chart(format!(
                "starting child of '{parent_name}' must be one of its children"
            ))),
            _ => Err(EngineError::invalid_chart(format!(
                "'{parent_name}' is not a composite"
            ))),
        }
    }

    /// Sets a composite's preferred-entry mode.
    pub fn set_entry_mode(&mut self, node: NodeId, mode: EntryMode) -> Result<(), EngineError> {
        let name = self.name(node).to_string();
        match &mut self.nodes[node.0].kind {
            NodeKind::Composite { entry_mode, .. } => {
                *entry_mode = mode;
                Ok(())
            }
            _ => Err(EngineError::invalid_chart(format!(
                "'{name}' is not a composite"
            ))),
        }
    }

    // =========================================================================
    // Transition tables
    // =========================================================================

    /// Maps `event` to a direct transition in `state`'s table.
    pub fn transition(
        &mut self,
        state: NodeId,
        event: EventId,
        dest: NodeId,
    ) -> Result<(), EngineError> {
        self.set_target(state, event, Target::Node(dest))
    }

    /// Maps `event` to a guarded transition in `state`'s table.
    pub fn guarded_transition(
        &mut self,
        state: NodeId,
        event: EventId,
        guard: Guard,
    ) -> Result<(), EngineError> {
        self.set_target(state, event, Target::Guarded(guard))
    }

    /// Marks `event` as handled internally by `state`: consumed with no
    /// hooks and no state change.
    pub fn internal_transition(&mut self, state: NodeId, event: EventId) -> Result<(), EngineError> {
        self.set_target(state, event, Target::Internal)
    }

    fn set_target(
        &mut self,
        state: NodeId,
        event: EventId,
        target: Target,
    ) -> Result<(), EngineError> {
        if matches!(self.nodes[state.0].kind, NodeKind::Junction { .. }) {
            return Err(EngineError::invalid_chart(format!(
                "junction '{}' cannot own a transition table",
                self.name(state)
            )));
        }
        self.nodes[state.0].transitions.insert(event, target);
        Ok(())
    }

    /// Appends a (predicate, destination) branch to a junction. Branches are
    /// evaluated in insertion order ahead of the default.
    pub fn branch(
        &mut self,
        junction: NodeId,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
        dest: NodeId,
    ) -> Result<(), EngineError> {
        let name = self.name(junction).to_string();
        match &mut self.nodes[junction.0].kind {
            NodeKind::Junction { branches, .. } => {
                branches.push((Box::new(predicate), dest));
                Ok(())
            }
            _ => Err(EngineError::invalid_chart(format!(
                "'{name}' is not a junction"
            ))),
        }
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Installs the entry action of a node.
    pub fn on_entry(&mut self, node: NodeId, hook: impl Fn() + Send + Sync + 'static) {
        self.nodes[node.0].on_entry = Some(Box::new(hook));
    }

    /// Installs the exit action of a node.
    pub fn on_exit(&mut self, node: NodeId, hook: impl Fn() + Send + Sync + 'static) {
        self.nodes[node.0].on_exit = Some(Box::new(hook));
    }

    /// Installs the post-transition invariant check of a node.
    pub fn on_enforce(&mut self, node: NodeId, hook: impl Fn() + Send + Sync + 'static) {
        self.nodes[node.0].on_enforce = Some(Box::new(hook));
    }

    /// Installs the hook fired before the exit phase of any transition
    /// triggered by `event`.
    pub fn on_before(&mut self, event: EventId, hook: impl Fn() + Send + Sync + 'static) {
        self.events[event.0].on_before = Some(Box::new(hook));
    }

    /// Installs the hook fired between the exit and entry phases.
    pub fn on_during(&mut self, event: EventId, hook: impl Fn() + Send + Sync + 'static) {
        self.events[event.0].on_during = Some(Box::new(hook));
    }

    /// Installs the hook fired after the destination leaf is committed.
    pub fn on_after(&mut self, event: EventId, hook: impl Fn() + Send + Sync + 'static) {
        self.events[event.0].on_after = Some(Box::new(hook));
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    pub fn description(&self, node: NodeId) -> &str {
        &self.nodes[node.0].description
    }

    pub fn event_name(&self, event: EventId) -> &str {
        &self.events[event.0].name
    }

    pub fn event_description(&self, event: EventId) -> &str {
        &self.events[event.0].description
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// The attached children, in attachment order. Empty for plain states
    /// and junctions.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        match &self.nodes[node.0].kind {
            NodeKind::Composite { children, .. } => children,
            _ => &[],
        }
    }

    pub fn starting_child(&self, node: NodeId) -> Option<NodeId> {
        match &self.nodes[node.0].kind {
            NodeKind::Composite { starting, .. } => *starting,
            _ => None,
        }
    }

    pub fn entry_mode(&self, node: NodeId) -> Option<EntryMode> {
        match &self.nodes[node.0].kind {
            NodeKind::Composite { entry_mode, .. } => Some(*entry_mode),
            _ => None,
        }
    }

    pub fn is_composite(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Composite { .. })
    }

    pub fn is_junction(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Junction { .. })
    }

    /// Whether `current` may rest on this node: a node with no children.
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.children(node).is_empty() && !self.is_junction(node)
    }

    /// The root-ward ancestor chain of `node`, nearest first, excluding the
    /// node itself.
    pub fn ancestry(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = self.nodes[node.0].parent;
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.nodes[id.0].parent;
        }
        chain
    }

    /// The nearest node that is a proper ancestor of both `a` and `b`, or
    /// `None` when their subtrees only meet above every root.
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let b_chain = self.ancestry(b);
        self.ancestry(a).into_iter().find(|id| b_chain.contains(id))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Structural check run at machine construction. A chart that passes is
    /// assumed well-formed for the rest of its life; event processing never
    /// re-raises these.
    pub(crate) fn validate(&self, initial: NodeId) -> Result<(), EngineError> {
        if initial.0 >= self.nodes.len() {
            return Err(EngineError::invalid_chart(
                "initial node does not belong to this chart",
            ));
        }

        for node in &self.nodes {
            // Parent links must form a tree.
            let mut cursor = node.parent;
            let mut steps = 0;
            while let Some(id) = cursor {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(EngineError::invalid_chart(format!(
                        "parent chain of '{}' contains a cycle",
                        node.name
                    )));
                }
                cursor = self.nodes[id.0].parent;
            }

            if let NodeKind::Composite {
                starting, children, ..
            } = &node.kind
            {
                if !children.is_empty() {
                    let starting = (*starting).ok_or_else(|| {
                        EngineError::invalid_chart(format!(
                            "composite '{}' has children but no starting child",
                            node.name
                        ))
                    })?;
                    if !children.contains(&starting) {
                        return Err(EngineError::invalid_chart(format!(
                            "starting child of '{}' is not one of its children",
                            node.name
                        )));
                    }
                }
            }
        }

        self.check_resolution_cycles()
    }

    /// Rejects redirect loops that would make event-time descent diverge:
    /// junction edges may jump anywhere, so a cycle through junctions (and
    /// the starting children between them) must be caught at definition
    /// time.
    fn check_resolution_cycles(&self) -> Result<(), EngineError> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color = vec![WHITE; self.nodes.len()];

        fn visit(chart: &Chart, id: NodeId, color: &mut [u8]) -> Result<(), EngineError> {
            if color[id.0] == BLACK {
                return Ok(());
            }
            if color[id.0] == GRAY {
                return Err(EngineError::invalid_chart(format!(
                    "resolution cycle through '{}'",
                    chart.name(id)
                )));
            }
            color[id.0] = GRAY;
            match &chart.nodes[id.0].kind {
                NodeKind::Junction { default, branches } => {
                    visit(chart, *default, color)?;
                    for (_, dest) in branches {
                        visit(chart, *dest, color)?;
                    }
                }
                NodeKind::Composite {
                    starting: Some(starting),
                    ..
                } => visit(chart, *starting, color)?,
                _ => {}
            }
            color[id.0] = BLACK;
            Ok(())
        }

        for idx in 0..self.nodes.len() {
            visit(self, NodeId(idx), &mut color)?;
        }
        Ok(())
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(data);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_child_becomes_starting() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.state("aa");
        let ab = chart.state("ab");

        chart.add_child(a, aa).unwrap();
        chart.add_child(a, ab).unwrap();

        assert_eq!(chart.starting_child(a), Some(aa));
        assert_eq!(chart.children(a), &[aa, ab]);
        assert_eq!(chart.parent(aa), Some(a));
    }

    #[test]
    fn test_add_child_promotes_plain_state() {
        let mut chart = Chart::new();
        let on = chart.state("on");
        let go = chart.state("go");

        assert!(!chart.is_composite(on));
        chart.add_child(on, go).unwrap();

        assert!(chart.is_composite(on));
        assert_eq!(chart.starting_child(on), Some(go));
    }

    #[test]
    fn test_promotion_preserves_transition_table() {
        let mut chart = Chart::new();
        let on = chart.state("on");
        let off = chart.state("off");
        let go = chart.state("go");
        let power = chart.event("power");

        chart.transition(on, power, off).unwrap();
        chart.add_child(on, go).unwrap();

        assert!(chart.nodes[on.0].transitions.contains_key(&power));
    }

    #[test]
    fn test_add_child_rejects_second_parent() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let b = chart.composite("b");
        let leaf = chart.state("leaf");

        chart.add_child(a, leaf).unwrap();
        let result = chart.add_child(b, leaf);
        assert!(matches!(result, Err(EngineError::InvalidChart { .. })));
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let b = chart.composite("b");

        chart.add_child(a, b).unwrap();
        let result = chart.add_child(b, a);
        assert!(matches!(result, Err(EngineError::InvalidChart { .. })));
    }

    #[test]
    fn test_junction_cannot_own_table_or_children() {
        let mut chart = Chart::new();
        let dest = chart.state("dest");
        let j = chart.junction("j", dest);
        let ev = chart.event("ev");
        let leaf = chart.state("leaf");

        assert!(matches!(
            chart.transition(j, ev, dest),
            Err(EngineError::InvalidChart { .. })
        ));
        assert!(matches!(
            chart.add_child(j, leaf),
            Err(EngineError::InvalidChart { .. })
        ));
    }

    #[test]
    fn test_identity_and_introspection() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.state("aa");
        let power = chart.event("power");

        chart.describe(a, "outer mode");
        chart.describe_event(power, "mains toggle");
        chart.add_child(a, aa).unwrap();

        assert_eq!(chart.name(a), "a");
        assert_eq!(chart.description(a), "outer mode");
        assert_eq!(chart.event_name(power), "power");
        assert_eq!(chart.event_description(power), "mains toggle");
        assert_eq!(chart.entry_mode(a), Some(EntryMode::StartingState));
        assert_eq!(chart.entry_mode(aa), None);
        assert!(chart.is_leaf(aa));
        assert!(!chart.is_leaf(a));
    }

    #[test]
    fn test_set_starting_child_must_be_child() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.state("aa");
        let stranger = chart.state("stranger");

        chart.add_child(a, aa).unwrap();
        assert!(chart.set_starting_child(a, stranger).is_err());
        chart.set_starting_child(a, aa).unwrap();
    }

    #[test]
    fn test_ancestry_is_rootward_and_excludes_self() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.composite("aa");
        let aaa = chart.state("aaa");

        chart.add_child(a, aa).unwrap();
        chart.add_child(aa, aaa).unwrap();

        assert_eq!(chart.ancestry(aaa), vec![aa, a]);
        assert_eq!(chart.ancestry(a), vec![]);
    }

    #[test]
    fn test_common_ancestor() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.composite("aa");
        let ab = chart.composite("ab");
        let aaa = chart.state("aaa");
        let aba = chart.state("aba");
        let b = chart.state("b");

        chart.add_child(a, aa).unwrap();
        chart.add_child(a, ab).unwrap();
        chart.add_child(aa, aaa).unwrap();
        chart.add_child(ab, aba).unwrap();

        assert_eq!(chart.common_ancestor(aaa, aba), Some(a));
        assert_eq!(chart.common_ancestor(aaa, aa), Some(a));
        assert_eq!(chart.common_ancestor(aaa, b), None);
    }

    #[test]
    fn test_validate_rejects_junction_redirect_loop() {
        let mut chart = Chart::new();
        let dest = chart.state("dest");
        let j1 = chart.junction("j1", dest);
        let j2 = chart.junction("j2", j1);
        // Close the loop: j1's only branch leads back through j2.
        chart.branch(j1, || true, j2).unwrap();

        let result = chart.validate(dest);
        assert!(matches!(result, Err(EngineError::InvalidChart { .. })));
    }

    #[test]
    fn test_validate_accepts_scenario_graph() {
        let mut chart = Chart::new();
        let a = chart.composite("a");
        let aa = chart.composite("aa");
        let aaa = chart.state("aaa");
        chart.add_child(a, aa).unwrap();
        chart.add_child(aa, aaa).unwrap();

        chart.validate(aaa).unwrap();
    }
}
