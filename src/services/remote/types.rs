//! Remote Session Control Types
//!
//! Core types for the remote control session layer: session codes, end
//! reasons, status snapshots, reconnect tuning and error handling.

use std::fmt;
use std::str::FromStr;

use companion_core::{CapabilityTier, RemoteAction};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session Code
// ---------------------------------------------------------------------------

/// Short, human-typable code identifying one session to the relay.
///
/// Case-insensitive: stored upper-cased and trimmed, so `"k7m 2qx"`-style
/// typing mistakes in case never produce a different code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(pub(super) String);

impl SessionCode {
    pub fn parse(raw: &str) -> Result<Self, RemoteError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RemoteError::InvalidCode(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = RemoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> String {
        code.0
    }
}

// ---------------------------------------------------------------------------
// Lifecycle Types
// ---------------------------------------------------------------------------

/// Why a session ended, as surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Local user pressed stop
    UserStopped,
    /// The code reached its fixed lifetime
    Expired,
    /// Stopped to restart at a different tier
    TierChanged,
    /// The relay dropped the registration and gave up reconnecting
    RelayLost,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::UserStopped => write!(f, "user_stopped"),
            EndReason::Expired => write!(f, "expired"),
            EndReason::TierChanged => write!(f, "tier_changed"),
            EndReason::RelayLost => write!(f, "relay_lost"),
        }
    }
}

/// Snapshot of the control session for the UI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSessionStatus {
    pub active: bool,
    pub code: Option<String>,
    pub tier: Option<CapabilityTier>,
    pub controller_connected: bool,
    pub started_at: Option<String>,
    pub expires_at: Option<String>,
    pub total_commands_processed: u64,
    /// Commands dropped as unknown, disallowed, unimplemented or over capacity
    pub dropped_commands: u64,
    pub last_command_at: Option<String>,
}

/// Configuration for reconnect behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts before giving up (default: 5)
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default: 30000)
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the delay for a given reconnect attempt using exponential backoff.
    ///
    /// Formula: `min(2^attempt * base_delay_ms, max_delay_ms)`
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.max_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

/// Remote control error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The session could not be registered; no session exists afterwards.
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    /// The relay already holds this code for another host.
    #[error("Session code already in use")]
    CodeCollision,

    #[error("A remote control session is already active")]
    SessionAlreadyActive,

    #[error("Invalid session code: {0}")]
    InvalidCode(String),

    /// Dropped silently; never reported to the remote peer.
    #[error("Unknown or disallowed command: {0}")]
    UnknownOrDisallowedCommand(String),

    /// The tier allows the action but the host registered nothing for it.
    #[error("No host callback registered for {0}")]
    CallbackUnavailable(RemoteAction),

    #[error("Host callback for {action} failed: {message}")]
    CallbackFailed {
        action: RemoteAction,
        message: String,
    },

    #[error("Invalid payload for {action}: {message}")]
    InvalidPayload {
        action: RemoteAction,
        message: String,
    },

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Failed to publish to relay: {0}")]
    PublishFailed(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
