//! Command Router
//!
//! Turns inbound relay commands into host callback invocations for one
//! session. Commands outside the session's tier are dropped before any host
//! code runs, and the remote peer cannot tell them apart from unknown names.
//!
//! Dispatch is serialized by [`run_dispatcher`], which drains a panic lane
//! ahead of the normal lane.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use companion_core::{
    ActionKind, CapabilityTier, InboundCommand, OutboundMessage, RemoteAction,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::callbacks::{HostCallbackRegistry, SafetyStep};
use super::notifier::ControlSessionNotifier;
use super::relay::RelayChannel;
use super::types::{RemoteError, SessionCode};

/// Per-session command counters surfaced in the status snapshot.
#[derive(Debug, Default)]
pub struct CommandStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    last_command_at: Mutex<Option<DateTime<Utc>>>,
}

impl CommandStats {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_command_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_command_at(&self) -> Option<String> {
        self.last_command_at
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.to_rfc3339()))
    }
}

/// What happened to one routed command.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// A direct or panic action reached the host. Callback failures still count.
    Dispatched(RemoteAction),
    /// A query was answered and published to the peer.
    Answered(RemoteAction),
    /// Dropped without effect.
    Dropped(RemoteError),
}

/// Work item on the panic lane.
#[derive(Debug, Clone, PartialEq)]
pub enum PanicRequest {
    /// `trigger_panic` from the remote peer.
    Remote(InboundCommand),
    /// The local emergency-stop shortcut.
    Local,
}

/// Run the local safety steps: halt output, close locked windows, restore the
/// main window. Each step runs even if an earlier one failed.
pub fn run_safety_sequence(registry: &HostCallbackRegistry) {
    for step in [SafetyStep::HaltOutput, SafetyStep::CloseLockedWindows] {
        if let Err(e) = registry.run_safety(step) {
            tracing::error!(step = step.as_str(), error = %e, "Safety step failed");
        }
    }

    match registry.invoke_action(RemoteAction::Restore, &Value::Null) {
        Ok(()) => {}
        Err(RemoteError::CallbackUnavailable(_)) => {
            tracing::error!("No restore callback registered, main window not raised");
        }
        Err(e) => {
            tracing::error!(error = %e, "Restoring main window failed");
        }
    }
}

/// Safety sequence first, then the host's own panic handling.
pub fn run_panic(registry: &HostCallbackRegistry, payload: &Value) {
    run_safety_sequence(registry);

    match registry.invoke_action(RemoteAction::TriggerPanic, payload) {
        Ok(()) => {}
        Err(RemoteError::CallbackUnavailable(_)) => {
            tracing::warn!("No trigger_panic callback registered, safety steps only");
        }
        Err(e) => {
            tracing::error!(error = %e, "Host panic callback failed");
        }
    }
}

/// Routes commands for one session. The tier is fixed at construction.
#[derive(Clone)]
pub struct CommandRouter {
    tier: CapabilityTier,
    code: SessionCode,
    registry: Arc<HostCallbackRegistry>,
    notifier: ControlSessionNotifier,
    relay: Arc<dyn RelayChannel>,
    stats: Arc<CommandStats>,
}

impl CommandRouter {
    pub fn new(
        tier: CapabilityTier,
        code: SessionCode,
        registry: Arc<HostCallbackRegistry>,
        notifier: ControlSessionNotifier,
        relay: Arc<dyn RelayChannel>,
        stats: Arc<CommandStats>,
    ) -> Self {
        Self {
            tier,
            code,
            registry,
            notifier,
            relay,
            stats,
        }
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    fn drop_command(&self, error: RemoteError) -> RouteOutcome {
        self.stats.record_dropped();
        RouteOutcome::Dropped(error)
    }

    /// Route one command from the peer.
    pub async fn route(&self, command: InboundCommand) -> RouteOutcome {
        let action = match command.action.parse::<RemoteAction>() {
            Ok(action) if self.tier.allows(action) => action,
            _ => {
                tracing::debug!(
                    code = %self.code,
                    tier = %self.tier,
                    "Dropped unknown or disallowed command"
                );
                return self.drop_command(RemoteError::UnknownOrDisallowedCommand(command.action));
            }
        };

        let outcome = match action.kind() {
            ActionKind::Panic => {
                tracing::warn!(code = %self.code, "Remote panic received");
                run_panic(&self.registry, &command.payload);
                RouteOutcome::Dispatched(action)
            }
            ActionKind::Direct => {
                match self.registry.invoke_action(action, &command.payload) {
                    Ok(()) => RouteOutcome::Dispatched(action),
                    Err(RemoteError::CallbackUnavailable(a)) => {
                        tracing::debug!(action = %a, "No host callback, command dropped");
                        return self.drop_command(RemoteError::CallbackUnavailable(a));
                    }
                    Err(e) => {
                        tracing::warn!(action = %action, error = %e, "Host action failed");
                        RouteOutcome::Dispatched(action)
                    }
                }
            }
            ActionKind::Query => match self.registry.run_query(action, &command.payload) {
                Ok(data) => {
                    let message = OutboundMessage::QueryResult { action, data };
                    if let Err(e) = self.relay.publish(&self.code, message).await {
                        tracing::warn!(action = %action, error = %e, "Query result not delivered");
                    }
                    RouteOutcome::Answered(action)
                }
                Err(RemoteError::CallbackUnavailable(a)) => {
                    tracing::debug!(action = %a, "No query callback, poll dropped");
                    return self.drop_command(RemoteError::CallbackUnavailable(a));
                }
                Err(e) => {
                    tracing::warn!(action = %action, error = %e, "Query failed");
                    return self.drop_command(e);
                }
            },
        };

        self.stats.record_processed();
        self.notifier.command_received(action);
        outcome
    }

    /// Handle one item from the panic lane.
    pub async fn handle_panic(&self, request: PanicRequest) {
        match request {
            PanicRequest::Remote(command) => {
                self.route(command).await;
            }
            PanicRequest::Local => {
                tracing::warn!(code = %self.code, "Local panic key pressed");
                run_panic(&self.registry, &Value::Null);
            }
        }
    }
}

/// Single consumer for one session's lanes.
///
/// The panic lane always wins when both lanes have work; normal commands
/// keep arrival order. On cancellation pending normal commands are dropped,
/// but every panic already queued still runs: the dispatcher keeps reading
/// the panic lane until all of its senders are gone.
pub async fn run_dispatcher(
    router: CommandRouter,
    mut panic_rx: mpsc::Receiver<PanicRequest>,
    mut normal_rx: mpsc::Receiver<InboundCommand>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(request) = panic_rx.recv() => router.handle_panic(request).await,
            Some(command) = normal_rx.recv() => {
                router.route(command).await;
            }
            else => break,
        }
    }

    drop(normal_rx);
    while let Some(request) = panic_rx.recv().await {
        tracing::warn!(code = %router.code, "Running panic queued before session end");
        router.handle_panic(request).await;
    }
    tracing::debug!(tier = %router.tier(), "Command dispatcher stopped");
}
