//! The call-leg orchestration state machine
//!
//! [`CallOrchestrator`] owns one session at a time: it acquires the session
//! credential, places the contact-center leg, then hands control to presence
//! evaluation - every roster snapshot (from the push transport or a direct
//! poll) runs the same ordered checks against the session's remembered
//! parameters and decides what should happen next. Externally visible side
//! effects (dialing, ending) are guarded so competing trigger sources can
//! never dispatch them twice.
//!
//! # Lifecycle
//!
//! ```text
//! idle -> getting_token -> dialing_leg1 -> waiting_agent_answered
//!      -> dialing_leg3 -> active -> ended        (error from any step)
//! ```
//!
//! `ended` and `error` are terminal for the session but a fresh
//! [`CallOrchestrator::start`] re-initializes every guard and re-enters
//! `getting_token`.
//!
//! # Concurrency
//!
//! All decision logic runs under one async mutex: no two snapshot
//! evaluations interleave. Remote calls triggered by a decision run outside
//! the lock, which is why every multi-step effect checks its guard flag
//! (`leg3_dialed`, `stopped`, `leg0_retired`) before dispatch.

use crate::config::{OrchestratorPolicy, StartParams};
use crate::dial::build_candidates;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EngineEventKind, ErrorNotice, EventBus, ListenerId};
use crate::legs::{classify, LegStatus};
use confline_conference_core::{
    participant_entries, ConferenceApi, ConferenceError, DialRequest, EventTransport, Roster,
    RosterSnapshot, TransportConfig, TransportHandle,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle phase of the orchestrated session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrchestratorPhase {
    /// No session
    #[default]
    Idle,
    /// Acquiring the session credential
    GettingToken,
    /// Placing the contact-center leg
    DialingLeg1,
    /// Waiting for presence to show the agent answered
    WaitingAgentAnswered,
    /// Placing the external leg
    DialingLeg3,
    /// Agent and external legs are both up
    Active,
    /// Session over (normal end, forced end, or retirement)
    Ended,
    /// Session failed to come up; a fresh `start` is required
    Error,
}

impl std::fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorPhase::Idle => "idle",
            OrchestratorPhase::GettingToken => "getting_token",
            OrchestratorPhase::DialingLeg1 => "dialing_leg1",
            OrchestratorPhase::WaitingAgentAnswered => "waiting_agent_answered",
            OrchestratorPhase::DialingLeg3 => "dialing_leg3",
            OrchestratorPhase::Active => "active",
            OrchestratorPhase::Ended => "ended",
            OrchestratorPhase::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Introspection snapshot returned by [`CallOrchestrator::debug_state`]
///
/// Exists so a host can wire a debug panel without any process-wide
/// registration.
#[derive(Debug, Clone)]
pub struct OrchestratorDebugState {
    /// Current lifecycle phase
    pub phase: OrchestratorPhase,
    /// Whether evaluation has been switched off
    pub stopped: bool,
    /// Sticky agent-readiness flag
    pub agent_ready: bool,
    /// External-dial guard
    pub leg3_dialed: bool,
    /// Whether a delayed dial retry is pending
    pub retry_pending: bool,
    /// Whether the bootstrap credential was retired
    pub leg0_retired: bool,
    /// Whether the minimum-two rule has armed
    pub min_two_armed: bool,
    /// Whether the four-leg kill switch has armed
    pub kill_armed: bool,
    /// Whether the post-drop grace window is open
    pub in_grace: bool,
    /// Connected count seen by the last evaluation
    pub last_connected: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Bumped by every `start`; snapshots tagged with an older value are
    /// discarded
    epoch: u64,
    phase: OrchestratorPhase,
    params: Option<StartParams>,
    stopped: bool,
    agent_ready: bool,
    leg3_dialed: bool,
    retry_pending: bool,
    leg0_retired: bool,
    min_two_armed: bool,
    kill_armed: bool,
    prev_connected: usize,
    grace_until: Option<Instant>,
    below_two_since: Option<Instant>,
    zero_since: Option<Instant>,
    kill_window_since: Option<Instant>,
    retire_window_since: Option<Instant>,
}

/// Side effects decided by one evaluation, executed outside the state lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    DialExternal,
    HardEnd,
    SoftStop,
    Retire,
}

/// Named, individually cancelable background tasks owned by the engine
#[derive(Default)]
struct EngineTasks {
    transport: Option<TransportHandle>,
    pump: Option<tokio::task::JoinHandle<()>>,
    retry: Option<tokio::task::JoinHandle<()>>,
}

impl EngineTasks {
    /// Cancel everything. The snapshot pump is left to drain on its own so
    /// a teardown running *on* the pump task cannot cancel itself mid-way;
    /// it exits when the transport's channel closes, and anything it still
    /// delivers is fenced off by the session epoch.
    fn stop_all(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.pump.take();
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

/// Builder for [`CallOrchestrator`]
pub struct CallOrchestratorBuilder {
    api: Arc<dyn ConferenceApi>,
    policy: OrchestratorPolicy,
    transport: Option<TransportConfig>,
}

impl CallOrchestratorBuilder {
    /// Override the timing policy
    pub fn with_policy(mut self, policy: OrchestratorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable the push transport; the alias is replaced per session from
    /// [`StartParams::session_alias`]
    ///
    /// Without a transport the host feeds snapshots itself through
    /// [`CallOrchestrator::on_roster`] or [`CallOrchestrator::refresh_from_server`].
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Finish building
    pub fn build(self) -> Arc<CallOrchestrator> {
        Arc::new(CallOrchestrator {
            api: self.api,
            policy: self.policy,
            transport: self.transport,
            events: EventBus::new(),
            state: Mutex::new(SessionState::default()),
            tasks: Mutex::new(EngineTasks::default()),
        })
    }
}

/// The orchestration engine; one live session per instance
pub struct CallOrchestrator {
    api: Arc<dyn ConferenceApi>,
    policy: OrchestratorPolicy,
    transport: Option<TransportConfig>,
    events: EventBus,
    state: Mutex<SessionState>,
    tasks: Mutex<EngineTasks>,
}

impl CallOrchestrator {
    /// Start building an engine over a conferencing API
    pub fn builder(api: Arc<dyn ConferenceApi>) -> CallOrchestratorBuilder {
        CallOrchestratorBuilder {
            api,
            policy: OrchestratorPolicy::default(),
            transport: None,
        }
    }

    /// Subscribe to one kind of engine event
    pub fn subscribe(
        &self,
        kind: EngineEventKind,
    ) -> (ListenerId, mpsc::UnboundedReceiver<EngineEvent>) {
        self.events.subscribe(kind)
    }

    /// Drop a subscription
    pub fn unsubscribe(&self, kind: EngineEventKind, id: &ListenerId) -> bool {
        self.events.unsubscribe(kind, id)
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> OrchestratorPhase {
        self.state.lock().await.phase
    }

    /// Introspection snapshot of guards, windows, and phase
    pub async fn debug_state(&self) -> OrchestratorDebugState {
        let state = self.state.lock().await;
        let now = Instant::now();
        OrchestratorDebugState {
            phase: state.phase,
            stopped: state.stopped,
            agent_ready: state.agent_ready,
            leg3_dialed: state.leg3_dialed,
            retry_pending: state.retry_pending,
            leg0_retired: state.leg0_retired,
            min_two_armed: state.min_two_armed,
            kill_armed: state.kill_armed,
            in_grace: state.grace_until.map(|until| now < until).unwrap_or(false),
            last_connected: state.prev_connected,
        }
    }

    /// Bring up a session: credential, transport, contact-center leg
    ///
    /// Fails (phase `error`, error event, everything torn down) if the
    /// credential cannot be acquired or the first leg cannot be placed;
    /// those are load-bearing. Once this returns `Ok`, agent and external
    /// leg readiness are driven entirely by presence evaluation.
    pub async fn start(self: &Arc<Self>, params: StartParams) -> EngineResult<()> {
        self.tasks.lock().await.stop_all();
        let epoch;
        {
            let mut state = self.state.lock().await;
            match state.phase {
                OrchestratorPhase::Idle | OrchestratorPhase::Ended | OrchestratorPhase::Error => {}
                phase => {
                    return Err(EngineError::invalid_state(format!(
                        "cannot start while session is in phase '{phase}'"
                    )))
                }
            }
            epoch = state.epoch.wrapping_add(1);
            *state = SessionState {
                epoch,
                params: Some(params.clone()),
                ..SessionState::default()
            };
            self.set_phase(&mut state, OrchestratorPhase::GettingToken);
        }
        info!(alias = %params.session_alias, "starting session");

        if let Err(err) = self.api.request_token(params.pin.as_deref()).await {
            return Err(self
                .fail_start(EngineError::TokenAcquisition { source: err })
                .await);
        }

        if let Some(template) = &self.transport {
            let config = TransportConfig {
                alias: params.session_alias.clone(),
                ..template.clone()
            };
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = EventTransport::spawn(config, self.api.token_store(), tx);
            let engine = Arc::clone(self);
            let pump = tokio::spawn(async move {
                while let Some(snapshot) = rx.recv().await {
                    engine.evaluate_snapshot(snapshot, epoch).await;
                }
            });
            let mut tasks = self.tasks.lock().await;
            tasks.transport = Some(handle);
            tasks.pump = Some(pump);
        }

        {
            let mut state = self.state.lock().await;
            self.set_phase(&mut state, OrchestratorPhase::DialingLeg1);
        }
        let mut request = DialRequest::new(&params.contact_center_alias)
            .with_keep_conference_alive(true);
        if let Some(name) = &params.display_name {
            request = request.with_source_display_name(name.clone());
        }
        if let Some(agent_id) = &params.agent_id {
            request = request.with_header("X-Agent-Id", agent_id.clone());
        }
        if let Some(queue_id) = &params.queue_id {
            request = request.with_header("X-Queue-Id", queue_id.clone());
        }
        let first_leg = match self.api.dial(request).await {
            Ok(ids) if !ids.is_empty() => Ok(()),
            Ok(_) => Err(ConferenceError::NoRouteCreated {
                destination: params.contact_center_alias.clone(),
            }),
            Err(err) => Err(err),
        };
        if let Err(source) = first_leg {
            return Err(self
                .fail_start(EngineError::FirstLegFailed {
                    destination: params.contact_center_alias.clone(),
                    source,
                })
                .await);
        }

        let mut state = self.state.lock().await;
        self.set_phase(&mut state, OrchestratorPhase::WaitingAgentAnswered);
        Ok(())
    }

    /// Evaluate one presence snapshot
    ///
    /// Invoked for every snapshot the transport publishes and for every
    /// explicit poll. Runs the full ordered check list; decisions that
    /// require remote calls are executed after the state lock is released.
    pub async fn on_roster(self: &Arc<Self>, snapshot: RosterSnapshot) {
        let epoch = self.state.lock().await.epoch;
        self.evaluate_snapshot(snapshot, epoch).await;
    }

    /// Evaluate a snapshot tagged with the session it was captured for
    ///
    /// The pump of a torn-down session may still be draining buffered
    /// snapshots when a fresh `start` resets the state; the epoch check
    /// keeps a previous session's presence from driving the new one.
    async fn evaluate_snapshot(self: &Arc<Self>, snapshot: RosterSnapshot, epoch: u64) {
        let actions = {
            let mut state = self.state.lock().await;
            if state.stopped || state.epoch != epoch {
                return;
            }
            self.evaluate(&mut state, &snapshot)
        };
        for action in actions {
            match action {
                Action::DialExternal => self.dial_external().await,
                Action::HardEnd => self.hard_end().await,
                Action::SoftStop => self.stop().await,
                Action::Retire => self.retire_leg0().await,
            }
        }
    }

    /// Force a poll-based resync (e.g. on tab-visibility resume)
    pub async fn refresh_from_server(self: &Arc<Self>) -> EngineResult<()> {
        if self.state.lock().await.stopped {
            return Ok(());
        }
        let raw = self.api.list_participants().await?;
        let mut roster = Roster::new();
        for entry in participant_entries(&raw) {
            roster.upsert(&entry);
        }
        self.on_roster(roster.snapshot()).await;
        Ok(())
    }

    /// Idempotent nudge: dial the external leg if the agent is ready and no
    /// attempt is in flight or pending
    pub async fn ensure_leg3_if_agent_ready(self: &Arc<Self>) {
        let proceed = {
            let mut state = self.state.lock().await;
            if state.stopped || !state.agent_ready || state.leg3_dialed || state.retry_pending {
                false
            } else {
                state.leg3_dialed = true;
                self.set_phase(&mut state, OrchestratorPhase::DialingLeg3);
                true
            }
        };
        if proceed {
            self.dial_external().await;
        }
    }

    /// Soft stop: close the transport and end the session without touching
    /// the remote conference. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if state.stopped && state.phase == OrchestratorPhase::Ended {
                return;
            }
            state.stopped = true;
            self.set_phase(&mut state, OrchestratorPhase::Ended);
        }
        self.tasks.lock().await.stop_all();
        self.api.stop_renewal();
        debug!("session stopped");
    }

    /// Hard end: best-effort remote disconnect of every participant, then
    /// the same teardown as [`stop`](Self::stop), then credential and
    /// session identity are cleared. Idempotent.
    pub async fn hard_end(&self) {
        {
            let state = self.state.lock().await;
            if state.stopped && state.params.is_none() {
                return;
            }
        }
        if let Err(err) = self.api.disconnect_all().await {
            warn!(error = %err, "disconnect_all failed; ignoring");
        }
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
            state.params = None;
            self.set_phase(&mut state, OrchestratorPhase::Ended);
        }
        self.tasks.lock().await.stop_all();
        self.api.release_token().await;
        debug!("session hard-ended");
    }

    // ===== internals =====

    fn set_phase(&self, state: &mut SessionState, phase: OrchestratorPhase) {
        if state.phase == phase {
            return;
        }
        debug!(from = %state.phase, to = %phase, "phase transition");
        state.phase = phase;
        self.events.emit(EngineEvent::Phase(phase));
    }

    /// Mark the start attempt failed: phase `error`, fatal error event,
    /// every timer and task torn down
    async fn fail_start(&self, err: EngineError) -> EngineError {
        warn!(error = %err, "start sequence failed");
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
            self.set_phase(&mut state, OrchestratorPhase::Error);
        }
        self.events.emit(EngineEvent::Error(ErrorNotice {
            message: err.to_string(),
            fatal: true,
        }));
        self.tasks.lock().await.stop_all();
        self.api.stop_renewal();
        err
    }

    /// The ordered decision logic, run for every snapshot
    fn evaluate(&self, state: &mut SessionState, snapshot: &RosterSnapshot) -> Vec<Action> {
        let now = Instant::now();
        let connected = snapshot.counts.connected;
        let mut actions = Vec::new();

        self.events.emit(EngineEvent::Roster(snapshot.clone()));

        // (a) A drop from >0 to 0 opens the grace window; teardown checks
        // are suppressed while it is open.
        if state.prev_connected > 0 && connected == 0 {
            state.grace_until = Some(now + self.policy.dormancy_grace);
            debug!(grace_secs = self.policy.dormancy_grace.as_secs(), "connected count dropped to zero; grace window open");
        }
        let in_grace = state.grace_until.map(|until| now < until).unwrap_or(false);

        // (b) Minimum-two liveness, armed once the count has reached 2.
        if connected >= 2 {
            state.min_two_armed = true;
        }
        if state.min_two_armed && connected < 2 && !in_grace {
            let since = *state.below_two_since.get_or_insert(now);
            if now.duration_since(since) > self.policy.min_two_hold {
                warn!(connected, "below two legs beyond hold; forcing end");
                actions.push(Action::HardEnd);
                state.prev_connected = connected;
                return actions;
            }
        } else {
            state.below_two_since = None;
        }

        // (c) Leg classification against the remembered session params.
        let Some(params) = state.params.clone() else {
            state.prev_connected = connected;
            return actions;
        };
        let legs: LegStatus = classify(
            snapshot,
            &params.contact_center_alias,
            &params.second_dial_alias,
        );

        // (d) Agent readiness is sticky: set once, never downgraded.
        if legs.leg1 && legs.leg2 && !state.agent_ready {
            state.agent_ready = true;
            info!("agent leg ready");
            if !state.leg3_dialed {
                state.leg3_dialed = true;
                self.set_phase(state, OrchestratorPhase::DialingLeg3);
                actions.push(Action::DialExternal);
            }
        }

        // (e) Active once agent and external legs are both present.
        if legs.leg2 && legs.leg3 && state.phase != OrchestratorPhase::Active {
            self.set_phase(state, OrchestratorPhase::Active);
            self.events.emit(EngineEvent::Active {
                active: true,
                roster: snapshot.clone(),
            });
        }

        // (f) Four-leg kill switch: arm after continuous full engagement,
        // no partial credit on breaks before arming.
        if legs.all_four() {
            let since = *state.kill_window_since.get_or_insert(now);
            if !state.kill_armed && now.duration_since(since) >= self.policy.kill_switch_arm {
                state.kill_armed = true;
                info!("kill switch armed");
            }
        } else if !state.kill_armed {
            state.kill_window_since = None;
        }
        if state.kill_armed && (!legs.leg1 || !legs.leg2) {
            warn!("armed kill switch tripped; forcing end");
            actions.push(Action::HardEnd);
            state.prev_connected = connected;
            return actions;
        }

        // (g) Leg-0 retirement after the stabilization window. One-time;
        // ends this engine's involvement without ending the conference.
        if !state.leg0_retired {
            if legs.all_four() {
                let since = *state.retire_window_since.get_or_insert(now);
                if now.duration_since(since) >= self.policy.stabilization
                    && legs.leg1
                    && legs.leg2
                {
                    state.leg0_retired = true;
                    info!("session stabilized; retiring bootstrap leg");
                    actions.push(Action::Retire);
                    state.prev_connected = connected;
                    return actions;
                }
            } else {
                state.retire_window_since = None;
            }
        }

        // (h) Idle teardown: empty conference, outside grace, beyond the
        // threshold.
        if connected == 0 && !in_grace {
            let since = *state.zero_since.get_or_insert(now);
            if now.duration_since(since) > self.policy.idle_teardown {
                info!("conference idle; stopping");
                actions.push(Action::SoftStop);
            }
        } else {
            state.zero_since = None;
        }

        state.prev_connected = connected;
        actions
    }

    /// Attempt the external leg: candidates in order until one creates a
    /// route. On exhaustion the guard clears, one retry is scheduled, the
    /// error surfaces as non-fatal, and the phase reverts.
    async fn dial_external(self: &Arc<Self>) {
        let Some(params) = self.state.lock().await.params.clone() else {
            return;
        };
        let candidates = build_candidates(
            &params.second_dial_alias,
            params.sip_domain_hint.as_deref(),
        );
        let mut last_error = String::new();
        for candidate in &candidates {
            if self.state.lock().await.stopped {
                return;
            }
            let request = DialRequest::new(candidate).with_role("guest");
            match self.api.dial(request).await {
                Ok(ids) if !ids.is_empty() => {
                    info!(candidate = %candidate, created = ids.len(), "external leg dialed");
                    return;
                }
                Ok(_) => {
                    last_error = ConferenceError::NoRouteCreated {
                        destination: candidate.clone(),
                    }
                    .to_string();
                    warn!(candidate = %candidate, "dial created no route");
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(candidate = %candidate, error = %err, "dial candidate failed");
                }
            }
        }

        let err = EngineError::DialExhausted {
            destination: params.second_dial_alias.clone(),
            attempts: candidates.len(),
            last_error,
        };
        let schedule_retry = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return;
            }
            state.leg3_dialed = false;
            self.set_phase(&mut state, OrchestratorPhase::WaitingAgentAnswered);
            if state.retry_pending {
                false
            } else {
                state.retry_pending = true;
                true
            }
        };
        self.events.emit(EngineEvent::Error(ErrorNotice {
            message: err.to_string(),
            fatal: false,
        }));
        if schedule_retry {
            let engine = Arc::clone(self);
            let delay = self.policy.dial_retry_delay;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.retry_external_dial().await;
            });
            self.tasks.lock().await.retry = Some(handle);
        }
    }

    /// The single delayed retry of an exhausted external dial.
    /// Boxed (not `async fn`) to break the async type cycle
    /// dial -> retry -> dial.
    fn retry_external_dial(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let proceed = {
                let mut state = self.state.lock().await;
                state.retry_pending = false;
                if state.stopped || !state.agent_ready || state.leg3_dialed {
                    false
                } else {
                    state.leg3_dialed = true;
                    self.set_phase(&mut state, OrchestratorPhase::DialingLeg3);
                    true
                }
            };
            if proceed {
                debug!("retrying external dial");
                self.dial_external().await;
            }
        })
    }

    /// Retire the bootstrap credential: close the transport, release the
    /// token (best-effort), end this engine's involvement. The conference
    /// itself keeps running.
    async fn retire_leg0(&self) {
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
            self.set_phase(&mut state, OrchestratorPhase::Ended);
        }
        self.tasks.lock().await.stop_all();
        self.api.release_token().await;
        info!("bootstrap leg retired");
    }
}
