//! Settings Models
//!
//! Remote control configuration and partial update structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::remote::types::ReconnectConfig;

/// Remote control configuration stored in remote_control.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteControlConfig {
    /// WebSocket endpoint of the relay (ws:// or wss://)
    pub relay_url: String,
    /// Lifetime of a session code in seconds, measured from start
    pub session_ttl_secs: u64,
    /// Number of characters in an issued session code
    pub code_length: usize,
    /// How many fresh codes to try when the relay reports a collision
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,
    /// Auto-hide delay for command feedback in the UI
    pub feedback_hide_ms: u64,
    /// Capacity of the normal command lane
    pub command_queue_capacity: usize,
    /// Relay reconnect behaviour
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_max_code_attempts() -> u32 {
    5
}

impl Default for RemoteControlConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8787/relay".to_string(),
            session_ttl_secs: 4 * 60 * 60,
            code_length: 6,
            max_code_attempts: 5,
            feedback_hide_ms: 2000,
            command_queue_capacity: 64,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteControlSettingsUpdate {
    pub relay_url: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub code_length: Option<usize>,
    pub max_code_attempts: Option<u32>,
    pub feedback_hide_ms: Option<u64>,
    pub command_queue_capacity: Option<usize>,
    pub reconnect: Option<ReconnectConfig>,
}

impl RemoteControlConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: RemoteControlSettingsUpdate) {
        if let Some(url) = update.relay_url {
            self.relay_url = url;
        }
        if let Some(ttl) = update.session_ttl_secs {
            self.session_ttl_secs = ttl;
        }
        if let Some(len) = update.code_length {
            self.code_length = len;
        }
        if let Some(attempts) = update.max_code_attempts {
            self.max_code_attempts = attempts;
        }
        if let Some(ms) = update.feedback_hide_ms {
            self.feedback_hide_ms = ms;
        }
        if let Some(capacity) = update.command_queue_capacity {
            self.command_queue_capacity = capacity;
        }
        if let Some(reconnect) = update.reconnect {
            self.reconnect = reconnect;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.relay_url)
            .map_err(|e| format!("Invalid relay_url {}: {}", self.relay_url, e))?;
        if !["ws", "wss"].contains(&url.scheme()) {
            return Err(format!(
                "Invalid relay_url scheme: {}. Must be 'ws' or 'wss'",
                url.scheme()
            ));
        }

        if self.session_ttl_secs < 60 {
            return Err("session_ttl_secs must be at least 60 seconds".to_string());
        }

        if !(4..=12).contains(&self.code_length) {
            return Err(format!(
                "code_length must be between 4 and 12, got {}",
                self.code_length
            ));
        }

        if self.max_code_attempts == 0 {
            return Err("max_code_attempts must be at least 1".to_string());
        }

        if self.command_queue_capacity == 0 {
            return Err("command_queue_capacity must be at least 1".to_string());
        }

        Ok(())
    }
}
