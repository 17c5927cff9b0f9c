//! Relay Channel
//!
//! Boundary to the external pub/sub or signaling service that carries
//! commands from the remote peer. Each relay implements registration of a
//! session code, delivery of peer events for that code, and publishing
//! replies back to the peer.

pub mod loopback;
pub mod websocket;

use async_trait::async_trait;
use companion_core::{InboundCommand, OutboundMessage, RelayRegistration};
use tokio::sync::mpsc;

use super::types::{RemoteError, SessionCode};

/// Event delivered by the relay for a registered code.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A peer attached (`true`) or detached (`false`).
    PeerConnection { connected: bool },
    /// A command from the attached peer.
    Command(InboundCommand),
}

/// Stream of events for one registered code.
///
/// The relay closes the channel when it drops the registration for good.
pub struct RelaySubscription {
    pub events: mpsc::Receiver<RelayEvent>,
}

/// Relay channel trait for session-code transports.
///
/// Implementations are responsible for:
/// - Registering `{ code, tier }` and rejecting codes already in use
/// - Forwarding peer attach/detach and commands for the code
/// - Publishing replies to the attached peer
/// - Forgetting the code on unregister, so later commands for it are refused
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Relay identifier for logs
    fn name(&self) -> &'static str;

    /// Register a code. `RemoteError::CodeCollision` when the code is taken.
    async fn register(
        &self,
        registration: RelayRegistration,
    ) -> Result<RelaySubscription, RemoteError>;

    /// Drop the registration for `code`. Unknown codes are not an error.
    async fn unregister(&self, code: &SessionCode) -> Result<(), RemoteError>;

    /// Send a message to the peer attached to `code`.
    ///
    /// Must not wait on the network: implementations queue and return.
    async fn publish(&self, code: &SessionCode, message: OutboundMessage)
        -> Result<(), RemoteError>;
}
