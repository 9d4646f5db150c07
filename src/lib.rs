//! # rshsm
//!
//! An embeddable hierarchical state machine engine.
//!
//! This crate provides:
//! - A statechart arena ([`Chart`]) of plain states, composites, and
//!   conditional junctions, with per-node and per-event lifecycle hooks
//! - Guarded and internal transitions
//! - Shallow/deep history re-entry per composite
//! - A transition engine ([`StateMachine`]) with a deterministic hook order
//!   and a reentrant processing lock
//!
//! ```
//! use rshsm::{Chart, StateMachine};
//!
//! let mut chart = Chart::new();
//! let go = chart.state("go");
//! let stop = chart.state("stop");
//! let cycle = chart.event("cycle");
//! chart.transition(go, cycle, stop)?;
//! chart.transition(stop, cycle, go)?;
//!
//! let machine = StateMachine::new(chart, go)?;
//! machine.process_event(cycle)?;
//! assert_eq!(machine.current_state(), stop);
//! # Ok::<(), rshsm::EngineError>(())
//! ```

pub mod chart;
pub mod error;
pub mod event;
pub mod guard;
pub mod machine;

pub use chart::{Chart, EntryMode, NodeId};
pub use error::EngineError;
pub use event::EventId;
pub use guard::{Guard, Hook, Predicate};
pub use machine::{StateMachine, TransitionOutcome};
