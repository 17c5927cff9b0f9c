//! Loopback Relay
//!
//! In-process relay used by tests and by hosts that embed the controller
//! page themselves. The "peer" side is driven through methods on the relay.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use companion_core::{CapabilityTier, InboundCommand, OutboundMessage, RelayRegistration};
use tokio::sync::mpsc;

use super::{RelayChannel, RelayEvent, RelaySubscription};
use crate::services::remote::types::{RemoteError, SessionCode};

const EVENT_BUFFER: usize = 256;

struct Registration {
    tier: CapabilityTier,
    events: mpsc::Sender<RelayEvent>,
}

#[derive(Default)]
struct LoopbackState {
    registrations: HashMap<SessionCode, Registration>,
    published: Vec<(SessionCode, OutboundMessage)>,
    offline: bool,
    forced_collisions: u32,
    register_calls: u32,
}

/// In-memory relay.
#[derive(Default)]
pub struct LoopbackRelay {
    state: Mutex<LoopbackState>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        // A poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate the relay being unreachable (`false`) or back (`true`).
    pub fn set_available(&self, available: bool) {
        self.state().offline = !available;
    }

    /// Make the next `count` registrations fail with a code collision.
    pub fn force_collisions(&self, count: u32) {
        self.state().forced_collisions = count;
    }

    /// Number of register calls seen, including failed ones.
    pub fn register_calls(&self) -> u32 {
        self.state().register_calls
    }

    pub fn is_registered(&self, code: &SessionCode) -> bool {
        self.state().registrations.contains_key(code)
    }

    pub fn registered_tier(&self, code: &SessionCode) -> Option<CapabilityTier> {
        self.state().registrations.get(code).map(|r| r.tier)
    }

    /// Codes currently registered.
    pub fn active_codes(&self) -> Vec<SessionCode> {
        self.state().registrations.keys().cloned().collect()
    }

    /// Messages published for `code`, oldest first.
    pub fn published(&self, code: &SessionCode) -> Vec<OutboundMessage> {
        self.state()
            .published
            .iter()
            .filter(|(c, _)| c == code)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn sender(&self, code: &SessionCode) -> Option<mpsc::Sender<RelayEvent>> {
        self.state()
            .registrations
            .get(code)
            .map(|r| r.events.clone())
    }

    async fn deliver(&self, code: &SessionCode, event: RelayEvent) -> bool {
        match self.sender(code) {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Peer attaches with `code`. Returns false if the relay refuses the code.
    pub async fn connect_peer(&self, code: &SessionCode) -> bool {
        self.deliver(code, RelayEvent::PeerConnection { connected: true })
            .await
    }

    /// Peer detaches from `code`.
    pub async fn disconnect_peer(&self, code: &SessionCode) -> bool {
        self.deliver(code, RelayEvent::PeerConnection { connected: false })
            .await
    }

    /// Peer sends a command. Returns false if the relay refuses the code.
    pub async fn send_command(&self, code: &SessionCode, command: InboundCommand) -> bool {
        self.deliver(code, RelayEvent::Command(command)).await
    }

    /// Relay drops the registration without the host asking.
    pub fn drop_registration(&self, code: &SessionCode) {
        self.state().registrations.remove(code);
    }
}

#[async_trait]
impl RelayChannel for LoopbackRelay {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn register(
        &self,
        registration: RelayRegistration,
    ) -> Result<RelaySubscription, RemoteError> {
        let code = SessionCode::parse(&registration.code)?;
        let mut state = self.state();
        state.register_calls += 1;

        if state.offline {
            return Err(RemoteError::RelayUnavailable(
                "loopback relay offline".to_string(),
            ));
        }
        if state.forced_collisions > 0 {
            state.forced_collisions -= 1;
            return Err(RemoteError::CodeCollision);
        }
        if state.registrations.contains_key(&code) {
            return Err(RemoteError::CodeCollision);
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.registrations.insert(
            code,
            Registration {
                tier: registration.tier,
                events: tx,
            },
        );
        Ok(RelaySubscription { events: rx })
    }

    async fn unregister(&self, code: &SessionCode) -> Result<(), RemoteError> {
        self.state().registrations.remove(code);
        Ok(())
    }

    async fn publish(
        &self,
        code: &SessionCode,
        message: OutboundMessage,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if !state.registrations.contains_key(code) {
            return Err(RemoteError::PublishFailed(format!(
                "code {} is not registered",
                code
            )));
        }
        state.published.push((code.clone(), message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(code: &str) -> RelayRegistration {
        RelayRegistration {
            code: code.to_string(),
            tier: CapabilityTier::Light,
        }
    }

    #[tokio::test]
    async fn test_register_and_deliver() {
        let relay = LoopbackRelay::new();
        let mut sub = relay.register(registration("ABCD23")).await.unwrap();
        let code = SessionCode::parse("abcd23").unwrap();

        assert!(relay.is_registered(&code));
        assert!(relay.connect_peer(&code).await);
        assert_eq!(
            sub.events.recv().await,
            Some(RelayEvent::PeerConnection { connected: true })
        );
    }

    #[tokio::test]
    async fn test_duplicate_code_collides() {
        let relay = LoopbackRelay::new();
        let _sub = relay.register(registration("ABCD23")).await.unwrap();
        assert!(matches!(
            relay.register(registration("abcd23")).await,
            Err(RemoteError::CodeCollision)
        ));
    }

    #[tokio::test]
    async fn test_offline_relay() {
        let relay = LoopbackRelay::new();
        relay.set_available(false);
        assert!(matches!(
            relay.register(registration("ABCD23")).await,
            Err(RemoteError::RelayUnavailable(_))
        ));
        relay.set_available(true);
        assert!(relay.register(registration("ABCD23")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_code_is_refused() {
        let relay = LoopbackRelay::new();
        let _sub = relay.register(registration("ABCD23")).await.unwrap();
        let code = SessionCode::parse("ABCD23").unwrap();
        relay.unregister(&code).await.unwrap();

        assert!(!relay.send_command(&code, InboundCommand::bare("show_overlay")).await);
        assert!(relay
            .publish(
                &code,
                OutboundMessage::SessionEnded {
                    reason: "expired".to_string()
                }
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_dropping_registration_closes_stream() {
        let relay = LoopbackRelay::new();
        let mut sub = relay.register(registration("ABCD23")).await.unwrap();
        relay.drop_registration(&SessionCode::parse("ABCD23").unwrap());
        assert!(sub.events.recv().await.is_none());
    }
}
