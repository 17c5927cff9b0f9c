//! Control Session Manager
//!
//! Owns the single active remote control session: code issuance, the expiry
//! deadline, the relay event pump and the command dispatcher.
//!
//! ```text
//! Idle → Active(disconnected) ⇄ Active(connected) → Ended
//! ```
//!
//! Every session carries its own id and cancellation token. Background tasks
//! end the session only through [`ControlSessionManager::end_session`], which
//! checks the id, so a task belonging to an old session can never end a newer
//! one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use companion_core::{
    CapabilityTier, InboundCommand, OutboundMessage, RemoteAction, TierConsent,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::callbacks::HostCallbackRegistry;
use super::code_issuer::SessionCodeIssuer;
use super::command_router::{
    run_dispatcher, run_panic, CommandRouter, CommandStats, PanicRequest,
};
use super::notifier::{ControlSessionEvent, ControlSessionNotifier};
use super::relay::{RelayChannel, RelayEvent, RelaySubscription};
use super::types::{ControlSessionStatus, EndReason, RemoteError, SessionCode};
use crate::models::settings::RemoteControlConfig;

const PANIC_LANE_CAPACITY: usize = 8;

/// Tunables taken from `RemoteControlConfig`.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_ttl: Duration,
    pub code_length: usize,
    pub max_code_attempts: u32,
    pub feedback_hide_ms: u64,
    pub command_queue_capacity: usize,
}

impl From<&RemoteControlConfig> for SessionSettings {
    fn from(config: &RemoteControlConfig) -> Self {
        Self {
            session_ttl: config.session_ttl(),
            code_length: config.code_length,
            max_code_attempts: config.max_code_attempts,
            feedback_hide_ms: config.feedback_hide_ms,
            command_queue_capacity: config.command_queue_capacity,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RemoteControlConfig::default())
    }
}

struct ActiveSession {
    id: Uuid,
    code: SessionCode,
    tier: CapabilityTier,
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    stats: Arc<CommandStats>,
    panic_tx: mpsc::Sender<PanicRequest>,
    dispatcher: JoinHandle<()>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    active: Option<ActiveSession>,
    /// Most recent code, never reissued back-to-back
    last_code: Option<SessionCode>,
}

struct Inner {
    relay: Arc<dyn RelayChannel>,
    registry: Arc<HostCallbackRegistry>,
    notifier: ControlSessionNotifier,
    issuer: SessionCodeIssuer,
    settings: SessionSettings,
    state: Mutex<ManagerState>,
}

/// Handle to the process's remote control session.
///
/// Cheap to clone; all clones share one session slot.
#[derive(Clone)]
pub struct ControlSessionManager {
    inner: Arc<Inner>,
}

impl ControlSessionManager {
    pub fn new(
        relay: Arc<dyn RelayChannel>,
        registry: Arc<HostCallbackRegistry>,
        settings: SessionSettings,
    ) -> Self {
        let issuer = SessionCodeIssuer::new(settings.code_length, settings.max_code_attempts);
        let notifier = ControlSessionNotifier::new(settings.feedback_hide_ms);
        Self {
            inner: Arc::new(Inner {
                relay,
                registry,
                notifier,
                issuer,
                settings,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlSessionEvent> {
        self.inner.notifier.subscribe()
    }

    pub fn registry(&self) -> &Arc<HostCallbackRegistry> {
        &self.inner.registry
    }

    /// Start a session for the consented tier.
    pub async fn start(&self, consent: TierConsent) -> Result<SessionCode, RemoteError> {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state, consent.tier()).await
    }

    /// End the active session. Returns false when there was none.
    pub async fn stop(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.active.take() {
            Some(session) => {
                self.teardown(session, EndReason::UserStopped).await;
                true
            }
            None => false,
        }
    }

    /// Stop the current session and start a new one at the consented tier.
    ///
    /// Both halves run under one lock so no command is ever evaluated in
    /// between. With no active session this is a plain start.
    pub async fn change_tier(&self, consent: TierConsent) -> Result<SessionCode, RemoteError> {
        let mut state = self.inner.state.lock().await;
        if let Some(session) = state.active.take() {
            self.teardown(session, EndReason::TierChanged).await;
        }
        self.start_locked(&mut state, consent.tier()).await
    }

    /// End session `session_id` if it is still the active one.
    pub async fn end_session(&self, session_id: Uuid, reason: EndReason) -> bool {
        let mut state = self.inner.state.lock().await;
        match &state.active {
            Some(session) if session.id == session_id => {}
            _ => return false,
        }
        match state.active.take() {
            Some(session) => {
                self.teardown(session, reason).await;
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> ControlSessionStatus {
        let state = self.inner.state.lock().await;
        match &state.active {
            None => ControlSessionStatus::default(),
            Some(session) => ControlSessionStatus {
                active: true,
                code: Some(session.code.to_string()),
                tier: Some(session.tier),
                controller_connected: session.connected.load(Ordering::SeqCst),
                started_at: Some(session.started_at.to_rfc3339()),
                expires_at: Some(session.expires_at.to_rfc3339()),
                total_commands_processed: session.stats.processed(),
                dropped_commands: session.stats.dropped(),
                last_command_at: session.stats.last_command_at(),
            },
        }
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active.is_some()
    }

    pub async fn current_code(&self) -> Option<SessionCode> {
        self.inner
            .state
            .lock()
            .await
            .active
            .as_ref()
            .map(|s| s.code.clone())
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        self.inner.state.lock().await.active.as_ref().map(|s| s.id)
    }

    pub async fn controller_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .active
            .as_ref()
            .map(|s| s.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Local emergency-stop shortcut.
    ///
    /// With a session running the panic goes onto its priority lane so it is
    /// serialized with remote commands. Otherwise it runs right here. A queued
    /// panic always runs, even if the session ends before it is dispatched.
    pub async fn trigger_local_panic(&self) {
        {
            let state = self.inner.state.lock().await;
            if let Some(session) = &state.active {
                match session.panic_tx.try_send(PanicRequest::Local) {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "Panic lane unavailable, running safety steps inline");
                    }
                }
            }
        }
        run_panic(&self.inner.registry, &serde_json::Value::Null);
    }

    async fn start_locked(
        &self,
        state: &mut ManagerState,
        tier: CapabilityTier,
    ) -> Result<SessionCode, RemoteError> {
        if state.active.is_some() {
            return Err(RemoteError::SessionAlreadyActive);
        }

        for action in self.inner.registry.missing_for(tier) {
            tracing::warn!(
                action = %action,
                tier = %tier,
                "Tier allows an action with no host callback, it will be dropped"
            );
        }

        let (code, subscription) = self
            .inner
            .issuer
            .issue(self.inner.relay.as_ref(), tier, state.last_code.as_ref())
            .await?;

        let id = Uuid::new_v4();
        let ttl = self.inner.settings.session_ttl;
        let started_at = Utc::now();
        let expires_at = started_at + chrono::Duration::seconds(ttl.as_secs() as i64);
        let deadline = Instant::now() + ttl;

        let cancel = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CommandStats::default());
        let (panic_tx, panic_rx) = mpsc::channel(PANIC_LANE_CAPACITY);
        let (normal_tx, normal_rx) = mpsc::channel(self.inner.settings.command_queue_capacity);

        let router = CommandRouter::new(
            tier,
            code.clone(),
            self.inner.registry.clone(),
            self.inner.notifier.clone(),
            self.inner.relay.clone(),
            stats.clone(),
        );
        let dispatcher = tokio::spawn(run_dispatcher(router, panic_rx, normal_rx, cancel.clone()));

        let pump = EventPump {
            inner: Arc::downgrade(&self.inner),
            session_id: id,
            code: code.clone(),
            lanes: Lanes {
                panic: panic_tx.clone(),
                normal: normal_tx,
            },
            connected: connected.clone(),
            stats: stats.clone(),
        };
        let pump = tokio::spawn(pump.run(subscription, cancel.clone()));

        tokio::spawn(expire_at(
            Arc::downgrade(&self.inner),
            id,
            deadline,
            cancel.clone(),
        ));

        tracing::info!(
            code = %code,
            tier = %tier,
            relay = self.inner.relay.name(),
            expires_at = %expires_at.to_rfc3339(),
            "Remote control session started"
        );

        state.last_code = Some(code.clone());
        state.active = Some(ActiveSession {
            id,
            code: code.clone(),
            tier,
            started_at,
            expires_at,
            cancel,
            connected,
            stats,
            panic_tx,
            dispatcher,
            pump,
        });
        Ok(code)
    }

    async fn teardown(&self, session: ActiveSession, reason: EndReason) {
        let ActiveSession {
            code,
            tier,
            cancel,
            connected,
            stats,
            panic_tx,
            dispatcher,
            pump,
            ..
        } = session;
        cancel.cancel();

        // The pump hands over panics still buffered in the relay, then the
        // dispatcher runs everything on the panic lane. Both finish before
        // anyone is told the session ended.
        drop(panic_tx);
        if let Err(e) = pump.await {
            tracing::error!(code = %code, error = %e, "Relay event pump failed");
        }
        if let Err(e) = dispatcher.await {
            tracing::error!(code = %code, error = %e, "Command dispatcher failed");
        }

        if connected.swap(false, Ordering::SeqCst) {
            self.inner.notifier.controller_connection_changed(false);
        }

        let ended = OutboundMessage::SessionEnded {
            reason: reason.to_string(),
        };
        if let Err(e) = self.inner.relay.publish(&code, ended).await {
            tracing::debug!(code = %code, error = %e, "Session end not delivered to peer");
        }
        if let Err(e) = self.inner.relay.unregister(&code).await {
            tracing::warn!(code = %code, error = %e, "Failed to unregister session code");
        }

        tracing::info!(
            code = %code,
            tier = %tier,
            reason = %reason,
            processed = stats.processed(),
            dropped = stats.dropped(),
            "Remote control session ended"
        );
        self.inner.notifier.session_ended(reason);
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<ControlSessionManager> {
    inner.upgrade().map(|inner| ControlSessionManager { inner })
}

struct Lanes {
    panic: mpsc::Sender<PanicRequest>,
    normal: mpsc::Sender<InboundCommand>,
}

impl Lanes {
    /// Never waits: a full lane drops the command.
    fn enqueue(&self, command: InboundCommand, stats: &CommandStats) {
        if is_panic(&command) {
            if let Err(e) = self.panic.try_send(PanicRequest::Remote(command)) {
                stats.record_dropped();
                tracing::warn!(error = %e, "Panic already queued, duplicate dropped");
            }
            return;
        }
        if let Err(e) = self.normal.try_send(command) {
            stats.record_dropped();
            tracing::warn!(error = %e, "Command queue full, command dropped");
        }
    }
}

fn is_panic(command: &InboundCommand) -> bool {
    command.action.trim() == RemoteAction::TriggerPanic.as_str()
}

/// Forwards relay events for one session into its dispatcher lanes.
struct EventPump {
    inner: Weak<Inner>,
    session_id: Uuid,
    code: SessionCode,
    lanes: Lanes,
    connected: Arc<AtomicBool>,
    stats: Arc<CommandStats>,
}

impl EventPump {
    async fn run(self, mut subscription: RelaySubscription, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.forward_pending_panics(&mut subscription);
                    return;
                }
                event = subscription.events.recv() => event,
            };

            match event {
                Some(RelayEvent::PeerConnection { connected }) => {
                    self.peer_changed(connected, &cancel)
                }
                Some(RelayEvent::Command(command)) => self.lanes.enqueue(command, &self.stats),
                None => {
                    tracing::warn!(code = %self.code, "Relay subscription closed");
                    // Teardown waits on this task, so it must not run here
                    if let Some(manager) = upgrade(&self.inner) {
                        let session_id = self.session_id;
                        tokio::spawn(async move {
                            manager.end_session(session_id, EndReason::RelayLost).await;
                        });
                    }
                    return;
                }
            }
        }
    }

    /// Panic commands the relay delivered before the session ended still run.
    /// Everything else left in the subscription is discarded.
    fn forward_pending_panics(&self, subscription: &mut RelaySubscription) {
        while let Ok(event) = subscription.events.try_recv() {
            if let RelayEvent::Command(command) = event {
                if is_panic(&command) {
                    self.lanes.enqueue(command, &self.stats);
                }
            }
        }
    }

    /// Notifies only on an actual change, and never once the session is
    /// ending.
    fn peer_changed(&self, connected: bool, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        tracing::info!(code = %self.code, connected, "Controller connection changed");
        if let Some(manager) = upgrade(&self.inner) {
            manager.inner.notifier.controller_connection_changed(connected);
        }
    }
}

async fn expire_at(
    inner: Weak<Inner>,
    session_id: Uuid,
    deadline: Instant,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep_until(deadline) => {
            if let Some(manager) = upgrade(&inner) {
                manager.end_session(session_id, EndReason::Expired).await;
            }
        }
    }
}
