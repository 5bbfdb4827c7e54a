//! Credentialed REST client for the conferencing API
//!
//! Four operations, all scoped to one conference alias: acquire a session
//! credential, place an outbound leg, list participants, and the best-effort
//! teardown pair (disconnect / release). The client owns background
//! credential renewal and shares the rotating token with the event transport
//! through a [`TokenStore`].
//!
//! The [`ConferenceApi`] trait is the seam the orchestration layer talks
//! through, so engines can be exercised against a mock without a server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use confline_conference_core::{ClientConfig, ConferenceApi, HttpConferenceClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpConferenceClient::new(
//!     ClientConfig::new("https://conf.example.com/api/client/v2", "weekly-sync")
//!         .with_display_name("Bridge Service"),
//! );
//! let grant = client.request_token(None).await?;
//! println!("token: {}", grant.token);
//! # Ok(())
//! # }
//! ```

use crate::error::{ConferenceError, ConferenceResult};
use crate::token::{TokenGrant, TokenStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for one conference-scoped client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the conferencing REST API, without trailing slash
    pub base_url: String,
    /// Conference alias all operations are scoped to
    pub alias: String,
    /// Display name presented when acquiring the credential
    pub display_name: String,
    /// Cadence of background credential renewal
    pub renewal_interval: Duration,
}

impl ClientConfig {
    /// Create a configuration with the default display name and a 55 second
    /// renewal cadence
    pub fn new(base_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            alias: alias.into(),
            display_name: "confline".to_string(),
            renewal_interval: Duration::from_secs(55),
        }
    }

    /// Set the display name used for the credential request
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Override the renewal cadence
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }
}

/// Body of a dial operation
///
/// Routing mode is always `"auto"`; the server picks the outbound gateway.
/// Optional fields are omitted from the wire when unset.
#[derive(Debug, Clone, Serialize)]
pub struct DialRequest {
    /// Destination address (bare alias, `user@domain`, or full SIP URI)
    pub destination: String,
    /// Routing mode; always `"auto"`
    pub protocol: String,
    /// Role granted to the created participant (e.g. `"guest"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Call type hint (e.g. `"audio"`, `"video"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Display name shown for the dialed-out leg
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_display_name: Option<String>,
    /// Local alias the leg is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_alias: Option<String>,
    /// Custom SIP headers attached to the outbound INVITE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_sip_headers: Option<HashMap<String, String>>,
    /// Keep the conference running when this leg is the last to leave
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_conference_alive: Option<bool>,
}

impl DialRequest {
    /// Create a dial request with routing mode `"auto"`
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            protocol: "auto".to_string(),
            role: None,
            call_type: None,
            source_display_name: None,
            local_alias: None,
            custom_sip_headers: None,
            keep_conference_alive: None,
        }
    }

    /// Set the participant role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the displayed source name
    pub fn with_source_display_name(mut self, name: impl Into<String>) -> Self {
        self.source_display_name = Some(name.into());
        self
    }

    /// Attach one custom SIP header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_sip_headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Keep the conference alive after this leg drops
    pub fn with_keep_conference_alive(mut self, keep: bool) -> Self {
        self.keep_conference_alive = Some(keep);
        self
    }
}

/// The conferencing operations the orchestration layer depends on
///
/// Implemented by [`HttpConferenceClient`] for production and by mocks in
/// engine tests. All operations act on the single alias the implementation
/// was configured with.
#[async_trait]
pub trait ConferenceApi: Send + Sync {
    /// Acquire a session credential, optionally presenting a PIN
    ///
    /// On success the implementation begins background renewal of the
    /// credential.
    async fn request_token(&self, pin: Option<&str>) -> ConferenceResult<TokenGrant>;

    /// Refresh the held credential once, rotating it if the server returned
    /// a replacement value
    async fn refresh_token(&self) -> ConferenceResult<()>;

    /// Place an outbound leg; returns the created participant ids
    ///
    /// An empty list means the HTTP call succeeded but no route was created;
    /// callers must treat that as a dial failure.
    async fn dial(&self, request: DialRequest) -> ConferenceResult<Vec<String>>;

    /// Fetch the raw roster payload for normalization by the roster model
    async fn list_participants(&self) -> ConferenceResult<Value>;

    /// Ask the server to disconnect every participant (best-effort)
    async fn disconnect_all(&self) -> ConferenceResult<()>;

    /// Release the held credential (best-effort; never surfaces errors)
    ///
    /// Stops renewal first; a failed release call is logged and swallowed
    /// because every caller of this operation is itself best-effort.
    async fn release_token(&self);

    /// Handle to the rotating credential, for the event transport
    fn token_store(&self) -> TokenStore;

    /// Cancel background credential renewal without releasing the token
    fn stop_renewal(&self);
}

/// REST implementation of [`ConferenceApi`]
pub struct HttpConferenceClient {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: TokenStore,
    renewal: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpConferenceClient {
    /// Create a client for one conference alias
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens: TokenStore::new(),
            renewal: Mutex::new(None),
        }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, operation: &str) -> String {
        format!(
            "{}/conferences/{}/{}",
            self.config.base_url, self.config.alias, operation
        )
    }

    fn current_token(&self) -> ConferenceResult<String> {
        self.tokens
            .current()
            .ok_or_else(|| ConferenceError::MissingToken {
                alias: self.config.alias.clone(),
            })
    }

    /// Spawn (or replace) the renewal task: one immediate tick, then the
    /// configured cadence. Failed ticks are tolerated silently and retried
    /// on the next one.
    fn start_renewal(&self) {
        let http = self.http.clone();
        let config = self.config.clone();
        let tokens = self.tokens.clone();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(config.renewal_interval);
            loop {
                ticks.tick().await;
                match refresh_once(&http, &config, &tokens).await {
                    Ok(rotated) => {
                        debug!(alias = %config.alias, rotated, "credential renewed");
                    }
                    Err(err) => {
                        warn!(alias = %config.alias, error = %err, "credential renewal failed; will retry");
                    }
                }
            }
        });

        if let Some(previous) = self.renewal.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for HttpConferenceClient {
    fn drop(&mut self) {
        if let Some(handle) = self.renewal.lock().take() {
            handle.abort();
        }
    }
}

async fn refresh_once(
    http: &reqwest::Client,
    config: &ClientConfig,
    tokens: &TokenStore,
) -> ConferenceResult<bool> {
    let token = tokens
        .current()
        .ok_or_else(|| ConferenceError::MissingToken {
            alias: config.alias.clone(),
        })?;
    let response = http
        .post(format!(
            "{}/conferences/{}/refresh_token",
            config.base_url, config.alias
        ))
        .header("token", token)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ConferenceError::Rejected {
            operation: "refresh_token".to_string(),
            status: response.status().as_u16(),
        });
    }
    let body: Value = response.json().await?;
    // Rotation is optional; the server may just extend the current value.
    let rotated = body
        .get("token")
        .or_else(|| body.get("result").and_then(|r| r.get("token")))
        .and_then(Value::as_str)
        .map(|fresh| tokens.rotate_if_changed(fresh))
        .unwrap_or(false);
    Ok(rotated)
}

/// Pull participant-id strings out of a dial response
///
/// Accepts a bare array or `{ "result": [...] }`, with entries as plain
/// strings or objects carrying an identity field.
fn created_participant_ids(body: &Value) -> Vec<String> {
    let entries = match body {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(obj) => obj
            .get("result")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => ["participant_uuid", "uuid", "id"]
                .iter()
                .find_map(|key| obj.get(*key))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ConferenceApi for HttpConferenceClient {
    async fn request_token(&self, pin: Option<&str>) -> ConferenceResult<TokenGrant> {
        let mut request = self
            .http
            .post(self.url("request_token"))
            .json(&serde_json::json!({ "display_name": self.config.display_name }));
        if let Some(pin) = pin {
            request = request.header("pin", pin);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ConferenceError::Rejected {
                operation: "request_token".to_string(),
                status: response.status().as_u16(),
            });
        }
        let body: Value = response.json().await?;
        // Token responses come either flat or under "result".
        let grant: TokenGrant = serde_json::from_value(
            body.get("result").cloned().unwrap_or(body),
        )?;

        self.tokens.set(&grant.token);
        self.start_renewal();
        debug!(alias = %self.config.alias, "session credential acquired");
        Ok(grant)
    }

    async fn refresh_token(&self) -> ConferenceResult<()> {
        refresh_once(&self.http, &self.config, &self.tokens).await?;
        Ok(())
    }

    async fn dial(&self, request: DialRequest) -> ConferenceResult<Vec<String>> {
        let token = self.current_token()?;
        let destination = request.destination.clone();
        let response = self
            .http
            .post(self.url("dial"))
            .header("token", token)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConferenceError::Rejected {
                operation: "dial".to_string(),
                status: response.status().as_u16(),
            });
        }
        let body: Value = response.json().await?;
        let ids = created_participant_ids(&body);
        debug!(alias = %self.config.alias, destination = %destination, created = ids.len(), "dial completed");
        Ok(ids)
    }

    async fn list_participants(&self) -> ConferenceResult<Value> {
        let token = self.current_token()?;
        let response = self
            .http
            .get(self.url("participants"))
            .header("token", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConferenceError::Rejected {
                operation: "participants".to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn disconnect_all(&self) -> ConferenceResult<()> {
        let token = self.current_token()?;
        let response = self
            .http
            .post(self.url("disconnect"))
            .header("token", token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConferenceError::Rejected {
                operation: "disconnect".to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn release_token(&self) {
        self.stop_renewal();
        let Some(token) = self.tokens.current() else {
            return;
        };
        let result = self
            .http
            .post(self.url("release_token"))
            .header("token", token)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(alias = %self.config.alias, "session credential released");
            }
            Ok(response) => {
                warn!(alias = %self.config.alias, status = %response.status(), "release_token rejected; ignoring");
            }
            Err(err) => {
                warn!(alias = %self.config.alias, error = %err, "release_token failed; ignoring");
            }
        }
        self.tokens.clear();
    }

    fn token_store(&self) -> TokenStore {
        self.tokens.clone()
    }

    fn stop_renewal(&self) {
        if let Some(handle) = self.renewal.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dial_request_omits_unset_fields() {
        let request = DialRequest::new("ext@example.com");
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(
            wire,
            json!({ "destination": "ext@example.com", "protocol": "auto" })
        );
    }

    #[test]
    fn dial_request_serializes_options() {
        let request = DialRequest::new("+15551234@cc.example.com")
            .with_role("guest")
            .with_header("X-Agent-Id", "a42")
            .with_keep_conference_alive(true);
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["protocol"], "auto");
        assert_eq!(wire["role"], "guest");
        assert_eq!(wire["custom_sip_headers"]["X-Agent-Id"], "a42");
        assert_eq!(wire["keep_conference_alive"], true);
    }

    #[test]
    fn created_ids_from_both_shapes() {
        assert_eq!(
            created_participant_ids(&json!(["p1", "p2"])),
            vec!["p1", "p2"]
        );
        assert_eq!(
            created_participant_ids(&json!({ "result": [{ "uuid": "p3" }] })),
            vec!["p3"]
        );
        assert!(created_participant_ids(&json!({ "result": [] })).is_empty());
        assert!(created_participant_ids(&json!(null)).is_empty());
    }

    #[test]
    fn base_url_is_normalized() {
        let config = ClientConfig::new("https://conf.example.com/api/", "room");
        assert_eq!(config.base_url, "https://conf.example.com/api");
    }
}
