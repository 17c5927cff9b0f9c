//! Relay Message Shapes
//!
//! The JSON shapes exchanged with the relay channel and the remote peer, plus
//! the query results the host answers polls with. Only the shapes are defined
//! here; framing belongs to the relay adapters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{CapabilityTier, RemoteAction};

/// Sent to the relay when a session starts: `{ code, tier }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRegistration {
    pub code: String,
    pub tier: CapabilityTier,
}

/// Command from the remote peer: `{ action, payload? }`.
///
/// `action` stays a string until the router parses it, so unknown names can be
/// dropped without failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundCommand {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundCommand {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }

    /// Command without a payload.
    pub fn bare(action: impl Into<String>) -> Self {
        Self::new(action, Value::Null)
    }
}

/// Messages the host publishes back to the peer through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Answer to a polled query.
    QueryResult { action: RemoteAction, data: Value },
    /// The host ended the session.
    SessionEnded { reason: String },
}

/// A session the host can start, as listed to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub total_seconds: u64,
}

/// Live state of the locally running session, computed on each poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgressSnapshot {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub elapsed_seconds: u64,
    pub total_seconds: u64,
    pub is_paused: bool,
    #[serde(default)]
    pub current_phase_name: Option<String>,
}
