//! # Confline Call Engine - Multi-Leg Call Orchestration
//!
//! This crate drives a three-party conference call to completion on top of
//! the `confline-conference-core` access layer:
//!
//! 1. acquire a session credential and open the push transport
//! 2. dial the contact center (leg 1) and wait for the agent's WebRTC
//!    presence (leg 2)
//! 3. once the agent is ready, dial the external party (leg 3), trying
//!    candidate address spellings in order
//! 4. supervise the established call with liveness heuristics, and retire
//!    the engine's own bootstrap presence once the call has stabilized
//!
//! The engine is presence-driven: every decision is a pure function of the
//! latest roster snapshot plus remembered session state, so the same logic
//! runs whether snapshots arrive over the push channel or from an explicit
//! poll.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use confline_call_engine::{CallOrchestrator, EngineEventKind, StartParams};
//! use confline_conference_core::{ClientConfig, HttpConferenceClient, TransportConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = "https://conf.example.com/api/client/v2";
//! let api = Arc::new(HttpConferenceClient::new(ClientConfig::new(base, "bridge-1234")));
//! let engine = CallOrchestrator::builder(api)
//!     .with_transport(TransportConfig::new(base, "bridge-1234"))
//!     .build();
//!
//! let (_id, mut phases) = engine.subscribe(EngineEventKind::Phase);
//! engine
//!     .start(
//!         StartParams::new("bridge-1234", "+15551234@cc.example.com", "ext@example.com")
//!             .with_agent_id("a42"),
//!     )
//!     .await?;
//! while let Some(event) = phases.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dial;
pub mod error;
pub mod events;
pub mod legs;
pub mod orchestrator;

pub use config::{OrchestratorPolicy, StartParams};
pub use dial::{build_candidates, classify_destination, DestinationKind};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EngineEventKind, ErrorNotice, EventBus, ListenerId};
pub use legs::{alias_matches, classify, LegStatus};
pub use orchestrator::{
    CallOrchestrator, CallOrchestratorBuilder, OrchestratorDebugState, OrchestratorPhase,
};
