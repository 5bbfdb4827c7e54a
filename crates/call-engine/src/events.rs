//! Outward event surface of the orchestration engine
//!
//! Events are a typed discriminated union - each kind carries its own
//! payload shape - dispatched through per-kind listener registries. A host
//! subscribes to exactly the kinds it cares about and receives them over an
//! unbounded channel; closed receivers are pruned on the next emit.
//!
//! # Usage
//!
//! ```rust
//! use confline_call_engine::events::{EngineEventKind, EventBus};
//!
//! let bus = EventBus::new();
//! let (id, mut phases) = bus.subscribe(EngineEventKind::Phase);
//! // ... feed `phases.recv()` into the host's UI loop ...
//! bus.unsubscribe(EngineEventKind::Phase, &id);
//! ```

use crate::orchestrator::OrchestratorPhase;
use confline_conference_core::RosterSnapshot;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Structured, cloneable error notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// Human-readable description of what failed
    pub message: String,
    /// Whether the session is over (`true`) or the engine will retry or
    /// keep running (`false`)
    pub fatal: bool,
}

/// One engine event with its kind-specific payload
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The lifecycle phase changed
    Phase(OrchestratorPhase),
    /// A new roster snapshot was evaluated
    Roster(RosterSnapshot),
    /// The call became active
    Active {
        /// Whether agent and external legs are both up
        active: bool,
        /// The snapshot that triggered the transition
        roster: RosterSnapshot,
    },
    /// Something went wrong; `fatal` distinguishes session-ending failures
    Error(ErrorNotice),
}

impl EngineEvent {
    /// The registry this event dispatches through
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Phase(_) => EngineEventKind::Phase,
            EngineEvent::Roster(_) => EngineEventKind::Roster,
            EngineEvent::Active { .. } => EngineEventKind::Active,
            EngineEvent::Error(_) => EngineEventKind::Error,
        }
    }
}

/// Event kinds a host can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    /// Lifecycle phase changes
    Phase,
    /// Roster snapshots
    Roster,
    /// Active-call transitions
    Active,
    /// Error notifications
    Error,
}

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Per-kind listener registries
///
/// A small map from event kind to the set of live subscriber channels.
/// Emission never blocks: channels are unbounded and dead subscribers are
/// dropped from the registry when a send fails.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: DashMap<EngineEventKind, HashMap<ListenerId, mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn subscribe(
        &self,
        kind: EngineEventKind,
    ) -> (ListenerId, mpsc::UnboundedReceiver<EngineEvent>) {
        let id = ListenerId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.entry(kind).or_default().insert(id, tx);
        (id, rx)
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&self, kind: EngineEventKind, id: &ListenerId) -> bool {
        self.listeners
            .get_mut(&kind)
            .map(|mut set| set.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Deliver an event to every live listener of its kind
    pub fn emit(&self, event: EngineEvent) {
        if let Some(mut set) = self.listeners.get_mut(&event.kind()) {
            set.retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of live listeners for a kind
    pub fn listener_count(&self, kind: EngineEventKind) -> usize {
        self.listeners.get(&kind).map(|set| set.len()).unwrap_or(0)
    }
}
