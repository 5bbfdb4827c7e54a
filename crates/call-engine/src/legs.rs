//! Leg-presence classification
//!
//! A snapshot says who is present; this module says which *legs* of the
//! orchestrated call those participants represent:
//!
//! - leg 0: the engine's own bootstrap API presence (`other` kind)
//! - leg 1: the contact-center SIP leg, matched by alias substring
//! - leg 2: the agent's WebRTC leg (any connected WebRTC participant)
//! - leg 3: the external party, matched by alias substring
//!
//! Alias matching is deliberately loose - case-insensitive substring with
//! any `sip:` prefix stripped - because gateways decorate display names
//! unpredictably.

use confline_conference_core::{ParticipantKind, RosterSnapshot};

/// Which legs a snapshot shows as up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegStatus {
    /// Bootstrap API presence
    pub leg0: bool,
    /// Contact-center SIP leg
    pub leg1: bool,
    /// Agent WebRTC leg
    pub leg2: bool,
    /// External destination leg
    pub leg3: bool,
}

impl LegStatus {
    /// All four legs simultaneously up
    pub fn all_four(&self) -> bool {
        self.leg0 && self.leg1 && self.leg2 && self.leg3
    }
}

/// Classify the legs present in a snapshot
pub fn classify(
    snapshot: &RosterSnapshot,
    contact_center_alias: &str,
    external_alias: &str,
) -> LegStatus {
    let mut status = LegStatus::default();
    for p in snapshot.connected() {
        match p.kind {
            ParticipantKind::Other => status.leg0 = true,
            ParticipantKind::Webrtc => status.leg2 = true,
            ParticipantKind::Sip => {}
        }
        let name = p.display_name.as_deref().unwrap_or("");
        if p.kind == ParticipantKind::Sip && alias_matches(name, contact_center_alias) {
            status.leg1 = true;
        }
        // The external party may land as sip or other depending on the
        // route, so leg 3 matches on name alone.
        if alias_matches(name, external_alias) {
            status.leg3 = true;
        }
    }
    status
}

/// Case-insensitive substring match with `sip:` prefixes stripped from both
/// sides
pub fn alias_matches(display_name: &str, alias: &str) -> bool {
    let needle = strip_sip(alias).to_ascii_lowercase();
    if needle.is_empty() {
        return false;
    }
    strip_sip(display_name)
        .to_ascii_lowercase()
        .contains(&needle)
}

fn strip_sip(value: &str) -> &str {
    value
        .strip_prefix("sip:")
        .or_else(|| value.strip_prefix("sips:"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confline_conference_core::{Participant, Roster};
    use serde_json::json;

    fn snapshot(entries: &[serde_json::Value]) -> RosterSnapshot {
        let mut roster = Roster::new();
        for entry in entries {
            roster.upsert(entry);
        }
        roster.snapshot()
    }

    #[test]
    fn alias_matching_strips_prefix_and_case() {
        assert!(alias_matches("SIP:+15551234@CC.example.com", "+15551234@cc"));
        assert!(alias_matches("Gateway [+1555@cc]", "sip:+1555@cc"));
        assert!(!alias_matches("someone else", "+1555@cc"));
        assert!(!alias_matches("anything", ""));
    }

    #[test]
    fn classify_maps_all_four_legs() {
        let snap = snapshot(&[
            json!({ "id": "api", "protocol": "api", "display_name": "bridge" }),
            json!({ "id": "cc", "protocol": "sip", "display_name": "+1555@cc" }),
            json!({ "id": "agent", "protocol": "webrtc", "display_name": "Agent Smith" }),
            json!({ "id": "ext", "protocol": "sip", "display_name": "sip:ext@domain" }),
        ]);
        let status = classify(&snap, "+1555@cc", "ext@domain");
        assert!(status.all_four(), "{status:?}");
    }

    #[test]
    fn disconnected_participants_do_not_count() {
        let snap = snapshot(&[
            json!({ "id": "cc", "protocol": "sip", "display_name": "+1555@cc", "is_connected": false }),
        ]);
        let status = classify(&snap, "+1555@cc", "ext@domain");
        assert!(!status.leg1);
    }

    #[test]
    fn webrtc_participant_is_leg2_regardless_of_video() {
        let p = Participant {
            id: "agent".into(),
            display_name: None,
            kind: ParticipantKind::Webrtc,
            is_connected: true,
            is_video: false,
        };
        let snap = RosterSnapshot {
            participants: vec![p],
            counts: Default::default(),
        };
        assert!(classify(&snap, "cc", "ext").leg2);
    }

    #[test]
    fn contact_center_match_requires_sip_kind() {
        let snap = snapshot(&[
            json!({ "id": "x", "protocol": "webrtc", "display_name": "+1555@cc" }),
        ]);
        let status = classify(&snap, "+1555@cc", "ext@domain");
        assert!(!status.leg1, "a webrtc participant cannot be the contact-center leg");
        assert!(status.leg2);
    }
}
