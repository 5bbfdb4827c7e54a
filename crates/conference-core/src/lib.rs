//! # Confline Conference Core - Conferencing-Server Access Layer
//!
//! This crate provides everything needed to observe and drive one conference
//! on a REST+server-push conferencing server:
//!
//! - **Roster model** ([`roster`]) - the canonical participant set, the
//!   single raw-to-domain normalization function, and derived snapshots
//! - **Session client** ([`client`]) - the credentialed REST wrapper for
//!   request_token / dial / participants / disconnect / release_token, with
//!   background credential renewal
//! - **Event transport** ([`transport`]) - the self-healing push-channel
//!   consumer that turns server events into published roster snapshots
//!
//! The orchestration logic that decides *what should happen next* lives one
//! layer up, in `confline-call-engine`, and reaches this crate exclusively
//! through the [`ConferenceApi`] trait and published [`RosterSnapshot`]s.

pub mod client;
pub mod error;
pub mod roster;
pub mod token;
pub mod transport;

pub use client::{ClientConfig, ConferenceApi, DialRequest, HttpConferenceClient};
pub use error::{ConferenceError, ConferenceResult};
pub use roster::{
    normalize_participant, participant_entries, Participant, ParticipantKind, Roster,
    RosterCounts, RosterSnapshot,
};
pub use token::{TokenGrant, TokenStore};
pub use transport::{EventTransport, TransportConfig, TransportHandle};
