//! Roster/presence model for a conference
//!
//! This module owns the canonical participant set and the derived counts the
//! orchestration layer makes decisions from. Raw participant payloads arrive
//! in several legacy and modern shapes (named push events, the generic
//! fallback message path, and the polling endpoint); all of them funnel
//! through [`normalize_participant`], so nothing above this module ever
//! inspects raw JSON.
//!
//! # Model rules
//!
//! - A participant's `id` is the sole dedup key: re-observing a known id is
//!   an in-place update, never a new entity.
//! - [`Roster::snapshot`] is a pure function of the current set. Each
//!   published [`RosterSnapshot`] is a total re-derivation and must be
//!   treated as immutable by consumers.
//! - A payload with no usable identity field normalizes to `None`; callers
//!   skip it (non-fatal).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Transport technology a participant joined with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    /// SIP or SIPS endpoint
    Sip,
    /// Browser/WebRTC endpoint
    Webrtc,
    /// Anything else, including the API's own bootstrap presence
    Other,
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantKind::Sip => write!(f, "sip"),
            ParticipantKind::Webrtc => write!(f, "webrtc"),
            ParticipantKind::Other => write!(f, "other"),
        }
    }
}

/// One participant in the conference, normalized from a raw payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity key; the only field used for dedup
    pub id: String,
    /// Human-readable name, when the server provided one
    pub display_name: Option<String>,
    /// Transport classification
    pub kind: ParticipantKind,
    /// Whether the participant currently has a live connection
    pub is_connected: bool,
    /// Whether the participant carries a video stream
    pub is_video: bool,
}

/// Derived counts published with every snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterCounts {
    /// Connected WebRTC participants with video
    pub webrtc_video: usize,
    /// Connected SIP participants with video
    pub sip_video: usize,
    /// All connected participants, any kind
    pub connected: usize,
}

/// Immutable, fully-derived view of the participant set
///
/// Recomputed from scratch on every publish; consumers must not assume any
/// relationship to previously published snapshots beyond the ids themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Participants, order-irrelevant
    pub participants: Vec<Participant>,
    /// Derived counts
    pub counts: RosterCounts,
}

impl RosterSnapshot {
    /// Iterate connected participants only
    pub fn connected(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_connected)
    }
}

/// The mutable participant set
///
/// Owned by whichever component is producing snapshots (the event transport
/// during normal operation, or an ad-hoc instance built from a poll).
#[derive(Debug, Default)]
pub struct Roster {
    participants: HashMap<String, Participant>,
}

impl Roster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a participant from a raw payload
    ///
    /// Returns `None` (and changes nothing) when the payload carries no
    /// usable identity field.
    pub fn upsert(&mut self, raw: &Value) -> Option<Participant> {
        let participant = normalize_participant(raw)?;
        self.participants
            .insert(participant.id.clone(), participant.clone());
        Some(participant)
    }

    /// Remove a participant by id; unknown ids are a no-op
    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Drop every participant (full-resync marker)
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    /// Number of participants currently tracked
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Re-derive the published view from the current set
    pub fn snapshot(&self) -> RosterSnapshot {
        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        // Stable output for equality checks; the set itself is unordered.
        participants.sort_by(|a, b| a.id.cmp(&b.id));

        let mut counts = RosterCounts::default();
        for p in &participants {
            if !p.is_connected {
                continue;
            }
            counts.connected += 1;
            if p.is_video {
                match p.kind {
                    ParticipantKind::Webrtc => counts.webrtc_video += 1,
                    ParticipantKind::Sip => counts.sip_video += 1,
                    ParticipantKind::Other => {}
                }
            }
        }

        RosterSnapshot {
            participants,
            counts,
        }
    }
}

/// Normalize one raw participant payload into the domain model
///
/// Field resolution order (first match wins):
/// - identity: `participant_uuid`, `uuid`, `id`
/// - display name: `display_name`, `name`, `participant_name`
/// - kind: `protocol` mapped case-insensitively (`webrtc`/`web`/`browser`,
///   `sip`/`sips`, anything else is `other`)
/// - connected: `is_connected`, `connected`, `is_connected_flag` in truthy
///   form; a payload with no connected field at all defaults to **connected**
///   (absence is not disconnection)
/// - video: `is_video`/`video`/`has_video` truthy, or any media/stream entry
///   whose `type` equals `"video"` (case-insensitive)
pub fn normalize_participant(raw: &Value) -> Option<Participant> {
    let obj = raw.as_object()?;

    let id = first_string(obj, &["participant_uuid", "uuid", "id"])?;

    let display_name = first_string(obj, &["display_name", "name", "participant_name"]);

    let kind = match obj
        .get("protocol")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("webrtc") | Some("web") | Some("browser") => ParticipantKind::Webrtc,
        Some("sip") | Some("sips") => ParticipantKind::Sip,
        _ => ParticipantKind::Other,
    };

    let is_connected = ["is_connected", "connected", "is_connected_flag"]
        .iter()
        .find_map(|key| obj.get(*key))
        .map(is_truthy)
        .unwrap_or(true);

    let explicit_video = ["is_video", "video", "has_video"]
        .iter()
        .find_map(|key| obj.get(*key))
        .map(is_truthy)
        .unwrap_or(false);
    let stream_video = ["media_streams", "streams", "media"]
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(Value::as_array)
        .flatten()
        .any(|entry| {
            entry
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t.eq_ignore_ascii_case("video"))
                .unwrap_or(false)
        });

    Some(Participant {
        id,
        display_name,
        kind,
        is_connected,
        is_video: explicit_video || stream_video,
    })
}

/// Extract the participant entries from a roster payload
///
/// The polling endpoint returns either a bare array or `{ "result": [...] }`;
/// both shapes land here.
pub fn participant_entries(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(entries) => entries.clone(),
        Value::Object(obj) => obj
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn first_string(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Truthy forms accepted for flag fields: booleans, non-zero numbers, and
/// the strings `1`, `true`, `yes`, `on` (case-insensitive)
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "on")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn identity_priority_prefers_participant_uuid() {
        let p = normalize_participant(&json!({
            "participant_uuid": "a",
            "uuid": "b",
            "id": "c",
        }))
        .unwrap();
        assert_eq!(p.id, "a");

        let p = normalize_participant(&json!({ "uuid": "b", "id": "c" })).unwrap();
        assert_eq!(p.id, "b");

        let p = normalize_participant(&json!({ "id": "c" })).unwrap();
        assert_eq!(p.id, "c");
    }

    #[test]
    fn missing_identity_is_skipped() {
        assert!(normalize_participant(&json!({ "display_name": "ghost" })).is_none());
        assert!(normalize_participant(&json!("not an object")).is_none());
    }

    #[test]
    fn display_name_fallback_order() {
        let p = normalize_participant(&json!({
            "id": "x",
            "name": "fallback",
            "participant_name": "last",
        }))
        .unwrap();
        assert_eq!(p.display_name.as_deref(), Some("fallback"));
    }

    #[test]
    fn protocol_mapping_is_case_insensitive() {
        for (proto, kind) in [
            ("WebRTC", ParticipantKind::Webrtc),
            ("web", ParticipantKind::Webrtc),
            ("Browser", ParticipantKind::Webrtc),
            ("SIP", ParticipantKind::Sip),
            ("sips", ParticipantKind::Sip),
            ("mssip", ParticipantKind::Other),
        ] {
            let p = normalize_participant(&json!({ "id": "x", "protocol": proto })).unwrap();
            assert_eq!(p.kind, kind, "protocol {proto}");
        }
        // No protocol field at all
        let p = normalize_participant(&json!({ "id": "x" })).unwrap();
        assert_eq!(p.kind, ParticipantKind::Other);
    }

    #[test]
    fn connected_truthy_forms_and_default() {
        for v in [json!(true), json!(1), json!("YES"), json!("on")] {
            let p = normalize_participant(&json!({ "id": "x", "is_connected": v })).unwrap();
            assert!(p.is_connected);
        }
        for v in [json!(false), json!(0), json!("no"), json!("")] {
            let p = normalize_participant(&json!({ "id": "x", "is_connected": v })).unwrap();
            assert!(!p.is_connected);
        }
        // Absence is not disconnection
        let p = normalize_participant(&json!({ "id": "x" })).unwrap();
        assert!(p.is_connected);
    }

    #[test]
    fn video_via_media_stream_entry() {
        let p = normalize_participant(&json!({
            "id": "x",
            "media_streams": [{ "type": "audio" }, { "type": "VIDEO" }],
        }))
        .unwrap();
        assert!(p.is_video);

        let p = normalize_participant(&json!({
            "id": "x",
            "streams": [{ "type": "audio" }],
        }))
        .unwrap();
        assert!(!p.is_video);
    }

    #[test]
    fn upsert_updates_in_place() {
        let mut roster = Roster::new();
        roster
            .upsert(&json!({ "id": "a", "protocol": "sip", "is_connected": false }))
            .unwrap();
        roster
            .upsert(&json!({ "id": "a", "protocol": "sip", "is_connected": true }))
            .unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.snapshot().counts.connected, 1);
    }

    #[test]
    fn snapshot_is_pure() {
        let mut roster = Roster::new();
        roster
            .upsert(&json!({ "id": "a", "protocol": "webrtc", "is_video": true }))
            .unwrap();
        roster.upsert(&json!({ "id": "b", "protocol": "sip" })).unwrap();

        let first = roster.snapshot();
        let second = roster.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.counts.webrtc_video, 1);
        assert_eq!(first.counts.sip_video, 0);
        assert_eq!(first.counts.connected, 2);
    }

    #[test]
    fn clear_resets_everything() {
        let mut roster = Roster::new();
        roster.upsert(&json!({ "id": "a" })).unwrap();
        roster.clear();
        assert_eq!(roster.len(), 0);
        assert_eq!(roster.snapshot(), RosterSnapshot::default());
    }

    #[test]
    fn participant_entries_accepts_both_shapes() {
        let bare = json!([{ "id": "a" }]);
        assert_eq!(participant_entries(&bare).len(), 1);

        let wrapped = json!({ "result": [{ "id": "a" }, { "id": "b" }] });
        assert_eq!(participant_entries(&wrapped).len(), 2);

        assert!(participant_entries(&json!(null)).is_empty());
    }
}
