//! Control Session Notifier
//!
//! Broadcast fan-out of session events to passive UI subscribers.

use companion_core::RemoteAction;
use serde::Serialize;
use tokio::sync::broadcast;

use super::types::EndReason;

const EVENT_CAPACITY: usize = 64;

/// Events the UI layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSessionEvent {
    ControllerConnectionChanged {
        connected: bool,
    },
    /// Transient on-screen feedback, hidden after `hide_after_ms`.
    CommandReceived {
        action: RemoteAction,
        label: &'static str,
        hide_after_ms: u64,
    },
    SessionEnded {
        reason: EndReason,
    },
}

#[derive(Debug, Clone)]
pub struct ControlSessionNotifier {
    tx: broadcast::Sender<ControlSessionEvent>,
    feedback_hide_ms: u64,
}

impl ControlSessionNotifier {
    pub fn new(feedback_hide_ms: u64) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            feedback_hide_ms,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlSessionEvent> {
        self.tx.subscribe()
    }

    // Sending with no subscribers is fine: nobody is watching the UI.
    fn emit(&self, event: ControlSessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn controller_connection_changed(&self, connected: bool) {
        self.emit(ControlSessionEvent::ControllerConnectionChanged { connected });
    }

    /// Emits feedback unless `action` is on the suppression list.
    pub fn command_received(&self, action: RemoteAction) {
        if let Some(label) = action.feedback_label() {
            self.emit(ControlSessionEvent::CommandReceived {
                action,
                label,
                hide_after_ms: self.feedback_hide_ms,
            });
        }
    }

    pub fn session_ended(&self, reason: EndReason) {
        self.emit(ControlSessionEvent::SessionEnded { reason });
    }
}
