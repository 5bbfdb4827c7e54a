//! Policy constants and session parameters
//!
//! The liveness heuristics (dormancy grace, minimum-two hold, stabilization
//! and kill-switch windows) encode empirically tuned call-flow rules, so
//! they live in [`OrchestratorPolicy`] as configurable values rather than
//! hard-coded invariants. The defaults are the production tuning.

use std::time::Duration;

/// Timing policy for the orchestration engine
///
/// # Examples
///
/// ```rust
/// use confline_call_engine::OrchestratorPolicy;
/// use std::time::Duration;
///
/// let policy = OrchestratorPolicy::default();
/// assert_eq!(policy.dormancy_grace, Duration::from_secs(8));
///
/// let tighter = OrchestratorPolicy::default()
///     .with_min_two_hold(Duration::from_millis(500));
/// assert_eq!(tighter.min_two_hold, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorPolicy {
    /// Window after a connected-count drop to zero during which teardown
    /// checks are suppressed (absorbs transport blips)
    pub dormancy_grace: Duration,
    /// How long the connected count may sit below two (once armed, outside
    /// grace) before the session is force-ended
    pub min_two_hold: Duration,
    /// How long the connected count may sit at zero (outside grace) before
    /// a soft stop
    pub idle_teardown: Duration,
    /// Continuous four-leg uptime required before the bootstrap credential
    /// is retired
    pub stabilization: Duration,
    /// Continuous four-leg uptime required before the kill switch arms
    pub kill_switch_arm: Duration,
    /// Delay before the single automatic retry of an exhausted external dial
    pub dial_retry_delay: Duration,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self {
            dormancy_grace: Duration::from_secs(8),
            min_two_hold: Duration::from_millis(1500),
            idle_teardown: Duration::from_secs(3),
            stabilization: Duration::from_secs(8),
            kill_switch_arm: Duration::from_secs(20),
            dial_retry_delay: Duration::from_millis(2500),
        }
    }
}

impl OrchestratorPolicy {
    /// Override the post-drop grace window
    pub fn with_dormancy_grace(mut self, window: Duration) -> Self {
        self.dormancy_grace = window;
        self
    }

    /// Override the minimum-two hold time
    pub fn with_min_two_hold(mut self, hold: Duration) -> Self {
        self.min_two_hold = hold;
        self
    }

    /// Override the idle-teardown threshold
    pub fn with_idle_teardown(mut self, threshold: Duration) -> Self {
        self.idle_teardown = threshold;
        self
    }

    /// Override the retirement stabilization window
    pub fn with_stabilization(mut self, window: Duration) -> Self {
        self.stabilization = window;
        self
    }

    /// Override the kill-switch arming window
    pub fn with_kill_switch_arm(mut self, window: Duration) -> Self {
        self.kill_switch_arm = window;
        self
    }

    /// Override the external-dial retry delay
    pub fn with_dial_retry_delay(mut self, delay: Duration) -> Self {
        self.dial_retry_delay = delay;
        self
    }
}

/// Parameters for one session, remembered for the lifetime of the session
/// and consulted by every snapshot evaluation
///
/// # Examples
///
/// ```rust
/// use confline_call_engine::StartParams;
///
/// let params = StartParams::new("weekly-sync", "+15551234@cc.example.com", "ext@example.com")
///     .with_agent_id("a42")
///     .with_queue_id("support")
///     .with_sip_domain_hint("example.com");
/// assert_eq!(params.session_alias, "weekly-sync");
/// ```
#[derive(Debug, Clone)]
pub struct StartParams {
    /// Conference alias the session runs on
    pub session_alias: String,
    /// Display name presented by the engine's own API presence
    pub display_name: Option<String>,
    /// Contact-center destination for the first outbound leg
    pub contact_center_alias: String,
    /// External destination for the second outbound leg
    pub second_dial_alias: String,
    /// Agent identifier, forwarded as a custom routing header
    pub agent_id: Option<String>,
    /// Queue identifier, forwarded as a custom routing header
    pub queue_id: Option<String>,
    /// PIN for protected conferences
    pub pin: Option<String>,
    /// Per-call SIP domain used to qualify bare external aliases
    pub sip_domain_hint: Option<String>,
}

impl StartParams {
    /// Create the minimal parameter set
    pub fn new(
        session_alias: impl Into<String>,
        contact_center_alias: impl Into<String>,
        second_dial_alias: impl Into<String>,
    ) -> Self {
        Self {
            session_alias: session_alias.into(),
            display_name: None,
            contact_center_alias: contact_center_alias.into(),
            second_dial_alias: second_dial_alias.into(),
            agent_id: None,
            queue_id: None,
            pin: None,
            sip_domain_hint: None,
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the agent identifier routing header
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the queue identifier routing header
    pub fn with_queue_id(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    /// Set the conference PIN
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    /// Set the SIP domain hint for bare external aliases
    pub fn with_sip_domain_hint(mut self, domain: impl Into<String>) -> Self {
        self.sip_domain_hint = Some(domain.into());
        self
    }
}
