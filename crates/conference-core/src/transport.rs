//! Self-healing server-push event transport
//!
//! Maintains a live event-stream connection scoped to one (alias, token)
//! pair and turns heterogeneous event encodings into roster mutations. The
//! transport publishes a [`RosterSnapshot`] on connection open and after
//! every mutating event, plus a heartbeat snapshot on a fixed cadence so a
//! consumer never appears frozen. If no event arrives within the dormancy
//! threshold, the connection is torn down completely and rebuilt with
//! exponential backoff and bounded random jitter.
//!
//! Event encodings handled:
//! - named sub-events `participant_update`, `participant_delete`,
//!   `participant_sync_begin`, `participant_sync_end`
//! - a generic fallback message whose payload embeds
//!   `{ "event": <name>, "data": <payload> }`

use crate::error::{ConferenceError, ConferenceResult};
use crate::roster::{Roster, RosterSnapshot};
use crate::token::TokenStore;
use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Configuration for the push-channel transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the conferencing REST API, without trailing slash
    pub base_url: String,
    /// Conference alias the stream is scoped to
    pub alias: String,
    /// Cadence of unconditional snapshot publishes
    pub heartbeat: Duration,
    /// Idle threshold after which the connection is rebuilt
    pub dormancy: Duration,
    /// First reconnect delay; doubles per attempt
    pub reconnect_initial: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
    /// Random jitter applied to each reconnect delay, plus or minus
    pub jitter: Duration,
    /// Lower bound on any reconnect delay after jitter
    pub min_delay: Duration,
}

impl TransportConfig {
    /// Create a configuration with the standard timing policy:
    /// 2s heartbeat, 20s dormancy, 2s→15s backoff, ±1s jitter, 250ms floor.
    pub fn new(base_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            alias: alias.into(),
            heartbeat: Duration::from_secs(2),
            dormancy: Duration::from_secs(20),
            reconnect_initial: Duration::from_secs(2),
            reconnect_max: Duration::from_secs(15),
            jitter: Duration::from_secs(1),
            min_delay: Duration::from_millis(250),
        }
    }

    /// Override the heartbeat cadence
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Override the dormancy threshold
    pub fn with_dormancy(mut self, dormancy: Duration) -> Self {
        self.dormancy = dormancy;
        self
    }
}

/// Handle to a spawned transport; dropping it does not stop the stream
#[derive(Debug)]
pub struct TransportHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl TransportHandle {
    /// Stop the transport and all of its timers
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

/// The push-channel consumer
pub struct EventTransport;

impl EventTransport {
    /// Spawn the transport loop for one (alias, credential) pair
    ///
    /// Snapshots are delivered through `tx` until [`TransportHandle::shutdown`]
    /// is called or the receiver is dropped.
    pub fn spawn(
        config: TransportConfig,
        tokens: TokenStore,
        tx: mpsc::UnboundedSender<RosterSnapshot>,
    ) -> TransportHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(config, tokens, tx, shutdown_rx));
        TransportHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

enum StreamEnd {
    /// Host asked us to stop
    Shutdown,
    /// No event within the dormancy threshold
    Dormant,
    /// Server closed the stream
    Closed,
}

async fn run(
    config: TransportConfig,
    tokens: TokenStore,
    tx: mpsc::UnboundedSender<RosterSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut roster = Roster::new();
    let mut backoff = config.reconnect_initial;

    loop {
        if *shutdown.borrow() || tx.is_closed() {
            break;
        }

        let mut connected = false;
        match stream_events(&config, &tokens, &mut roster, &tx, &mut shutdown, &mut connected)
            .await
        {
            Ok(StreamEnd::Shutdown) => break,
            Ok(StreamEnd::Dormant) => {
                warn!(alias = %config.alias, "event stream dormant; rebuilding connection");
            }
            Ok(StreamEnd::Closed) => {
                debug!(alias = %config.alias, "event stream closed by server");
            }
            Err(err) => {
                warn!(alias = %config.alias, error = %err, "event stream failed");
            }
        }

        if connected {
            backoff = config.reconnect_initial;
        }
        let delay = delay_with_jitter(backoff, config.jitter, config.min_delay);
        debug!(alias = %config.alias, delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
    debug!(alias = %config.alias, "event transport stopped");
}

/// One full connection lifetime: connect, publish on open, consume frames
/// until shutdown, dormancy, or stream end. The HTTP client is rebuilt per
/// attempt so no connection state survives a reconnect.
async fn stream_events(
    config: &TransportConfig,
    tokens: &TokenStore,
    roster: &mut Roster,
    tx: &mpsc::UnboundedSender<RosterSnapshot>,
    shutdown: &mut watch::Receiver<bool>,
    connected: &mut bool,
) -> ConferenceResult<StreamEnd> {
    let token = tokens
        .current()
        .ok_or_else(|| ConferenceError::MissingToken {
            alias: config.alias.clone(),
        })?;
    let url = format!(
        "{}/conferences/{}/events?token={}",
        config.base_url, config.alias, token
    );

    let http = reqwest::Client::new();
    let response = http.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(ConferenceError::Rejected {
            operation: "events".to_string(),
            status: response.status().as_u16(),
        });
    }
    *connected = true;
    debug!(alias = %config.alias, "event stream connected");

    // Snapshot on open so the consumer starts from the current set.
    publish(roster, tx);

    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_event = Instant::now();
    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(StreamEnd::Shutdown),
            _ = heartbeat.tick() => {
                publish(roster, tx);
                if last_event.elapsed() > config.dormancy {
                    return Ok(StreamEnd::Dormant);
                }
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    for line in drain_lines(&mut buffer) {
                        if let Some(frame) = parser.push_line(&line) {
                            last_event = Instant::now();
                            trace!(alias = %config.alias, event = %frame.event, "push event");
                            if apply_frame(roster, &frame) {
                                publish(roster, tx);
                            }
                        }
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(StreamEnd::Closed),
            }
        }
    }
}

fn publish(roster: &Roster, tx: &mpsc::UnboundedSender<RosterSnapshot>) {
    let _ = tx.send(roster.snapshot());
}

/// Reconnect delay: backoff plus a random offset in `[-jitter, +jitter]`,
/// never below the configured floor
fn delay_with_jitter(backoff: Duration, jitter: Duration, min_delay: Duration) -> Duration {
    let base = backoff.as_millis() as i64;
    let spread = jitter.as_millis() as i64;
    let offset = if spread > 0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0
    };
    let delayed = (base + offset).max(min_delay.as_millis() as i64);
    Duration::from_millis(delayed as u64)
}

/// Split completed lines (LF-terminated) out of the byte buffer
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        lines.push(line.trim_end_matches('\r').to_string());
    }
    lines
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `"message"` when the stream did not name one
    pub event: String,
    /// Raw data payload (joined multi-line)
    pub data: String,
}

/// Incremental SSE framing: `event:`/`data:` field lines accumulate until a
/// blank line dispatches the frame. Comment lines (leading `:`) and unknown
/// fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed one line; returns a completed frame on dispatch boundaries
    pub fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let frame = SseFrame {
                event: self.event.take().unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            };
            return Some(frame);
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }
}

/// Map a decoded frame onto the roster; returns whether the set changed
/// (and a snapshot should be published)
pub fn apply_frame(roster: &mut Roster, frame: &SseFrame) -> bool {
    let payload: Value = if frame.data.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = %frame.event, error = %err, "unparseable event payload; skipping");
                return false;
            }
        }
    };
    dispatch_event(roster, &frame.event, &payload)
}

fn dispatch_event(roster: &mut Roster, name: &str, payload: &Value) -> bool {
    match name {
        "participant_update" | "participant_create" => roster.upsert(payload).is_some(),
        "participant_delete" => payload
            .as_object()
            .and_then(|obj| {
                ["participant_uuid", "uuid", "id"]
                    .iter()
                    .find_map(|key| obj.get(*key))
            })
            .and_then(Value::as_str)
            .map(|id| roster.remove(id).is_some())
            .unwrap_or(false),
        "participant_sync_begin" => {
            roster.clear();
            true
        }
        "participant_sync_end" => true,
        // Fallback path: an untyped message wrapping { event, data }.
        _ => {
            let (Some(inner_name), Some(inner_data)) =
                (payload.get("event").and_then(Value::as_str), payload.get("data"))
            else {
                return false;
            };
            dispatch_event(roster, inner_name, inner_data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn frame(event: &str, data: Value) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn sse_parser_frames_named_events() {
        let mut parser = SseParser::default();
        assert_eq!(parser.push_line("event: participant_update"), None);
        assert_eq!(parser.push_line("data: {\"id\":\"a\"}"), None);
        let out = parser.push_line("").unwrap();
        assert_eq!(out.event, "participant_update");
        assert_eq!(out.data, "{\"id\":\"a\"}");
    }

    #[test]
    fn sse_parser_defaults_to_message_and_joins_data() {
        let mut parser = SseParser::default();
        parser.push_line(": keepalive comment");
        parser.push_line("data: line1");
        parser.push_line("data: line2");
        let out = parser.push_line("").unwrap();
        assert_eq!(out.event, "message");
        assert_eq!(out.data, "line1\nline2");
        // Blank line with nothing buffered is not a frame
        assert_eq!(parser.push_line(""), None);
    }

    #[test]
    fn drain_lines_handles_partial_chunks() {
        let mut buffer = b"data: a\r\nda".to_vec();
        assert_eq!(drain_lines(&mut buffer), vec!["data: a".to_string()]);
        buffer.extend_from_slice(b"ta: b\n\n");
        assert_eq!(
            drain_lines(&mut buffer),
            vec!["data: b".to_string(), String::new()]
        );
    }

    #[test]
    fn named_events_mutate_roster() {
        let mut roster = Roster::new();
        assert!(apply_frame(
            &mut roster,
            &frame("participant_update", json!({ "id": "a", "protocol": "sip" }))
        ));
        assert_eq!(roster.len(), 1);

        assert!(apply_frame(
            &mut roster,
            &frame("participant_delete", json!({ "id": "a" }))
        ));
        assert_eq!(roster.len(), 0);

        // Removing an unknown id is not a mutation
        assert!(!apply_frame(
            &mut roster,
            &frame("participant_delete", json!({ "id": "ghost" }))
        ));
    }

    #[test]
    fn sync_begin_clears_and_publishes() {
        let mut roster = Roster::new();
        roster.upsert(&json!({ "id": "a" })).unwrap();
        assert!(apply_frame(&mut roster, &frame("participant_sync_begin", json!({}))));
        assert_eq!(roster.len(), 0);
        assert!(apply_frame(&mut roster, &frame("participant_sync_end", json!({}))));
    }

    #[test]
    fn fallback_message_path_unwraps_embedded_event() {
        let mut roster = Roster::new();
        let wrapped = frame(
            "message",
            json!({ "event": "participant_update", "data": { "id": "b" } }),
        );
        assert!(apply_frame(&mut roster, &wrapped));
        assert_eq!(roster.len(), 1);

        // Unknown embedded event names are ignored
        let unknown = frame("message", json!({ "event": "chat_message", "data": {} }));
        assert!(!apply_frame(&mut roster, &unknown));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Duration::from_secs(2);
        let jitter = Duration::from_secs(1);
        let floor = Duration::from_millis(250);
        for _ in 0..200 {
            let d = delay_with_jitter(backoff, jitter, floor);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3));
        }
        // Floor applies when backoff minus jitter would go too low
        for _ in 0..200 {
            let d = delay_with_jitter(Duration::from_millis(100), jitter, floor);
            assert!(d >= floor);
        }
    }
}
