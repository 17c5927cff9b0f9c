//! Capability Tiers and Remote Action Catalog
//!
//! The closed set of actions a remote controller can name, and the three
//! fixed allow-lists that decide which of them a session honours.
//!
//! Wire names are a stable contract with the remote peer's page and with the
//! host registration surface. Adding a remotely-triggerable feature means
//! adding one variant here, listing it in exactly one tier's slice (and the
//! slices above it), and registering one host callback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Capability Tier
// ---------------------------------------------------------------------------

/// Permission level chosen by the local user before a session starts.
///
/// Immutable for the lifetime of one session code; widening requires a new
/// session and a new consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    Light,
    Standard,
    Full,
}

impl CapabilityTier {
    /// All tiers, narrowest first.
    pub const ALL: [CapabilityTier; 3] = [
        CapabilityTier::Light,
        CapabilityTier::Standard,
        CapabilityTier::Full,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityTier::Light => "light",
            CapabilityTier::Standard => "standard",
            CapabilityTier::Full => "full",
        }
    }

    /// The fixed allow-list for this tier.
    pub fn allowed_actions(self) -> &'static [RemoteAction] {
        match self {
            CapabilityTier::Light => LIGHT_ACTIONS,
            CapabilityTier::Standard => STANDARD_ACTIONS,
            CapabilityTier::Full => FULL_ACTIONS,
        }
    }

    /// Whether `action` is on this tier's allow-list.
    pub fn allows(self, action: RemoteAction) -> bool {
        self.allowed_actions().contains(&action)
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(CapabilityTier::Light),
            "standard" => Ok(CapabilityTier::Standard),
            "full" => Ok(CapabilityTier::Full),
            other => Err(CoreError::parse(format!("unknown capability tier: {}", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote Actions
// ---------------------------------------------------------------------------

/// How the router treats an action once it has passed the tier gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Push: invoke a host action callback with the payload.
    Direct,
    /// Pull: run a host query callback and publish the result to the peer.
    Query,
    /// Privileged direct action that runs the local safety sequence first.
    Panic,
}

/// Every action name the remote peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAction {
    // Light
    ShowOverlay,
    HideOverlay,
    StartAmbient,
    StopAmbient,
    TriggerPanic,
    // Standard
    TriggerVideo,
    HapticPulse,
    HapticIntensity,
    DuckAudio,
    UnduckAudio,
    CurrentProgress,
    // Full
    StartSession,
    PauseSession,
    ResumeSession,
    StopSession,
    EnableStrictLock,
    DisablePanicKey,
    Minimize,
    Restore,
    AvailableSessions,
    FindSession,
}

const LIGHT_ACTIONS: &[RemoteAction] = &[
    RemoteAction::ShowOverlay,
    RemoteAction::HideOverlay,
    RemoteAction::StartAmbient,
    RemoteAction::StopAmbient,
    RemoteAction::TriggerPanic,
];

const STANDARD_ACTIONS: &[RemoteAction] = &[
    RemoteAction::ShowOverlay,
    RemoteAction::HideOverlay,
    RemoteAction::StartAmbient,
    RemoteAction::StopAmbient,
    RemoteAction::TriggerPanic,
    RemoteAction::TriggerVideo,
    RemoteAction::HapticPulse,
    RemoteAction::HapticIntensity,
    RemoteAction::DuckAudio,
    RemoteAction::UnduckAudio,
    RemoteAction::CurrentProgress,
];

const FULL_ACTIONS: &[RemoteAction] = &[
    RemoteAction::ShowOverlay,
    RemoteAction::HideOverlay,
    RemoteAction::StartAmbient,
    RemoteAction::StopAmbient,
    RemoteAction::TriggerPanic,
    RemoteAction::TriggerVideo,
    RemoteAction::HapticPulse,
    RemoteAction::HapticIntensity,
    RemoteAction::DuckAudio,
    RemoteAction::UnduckAudio,
    RemoteAction::CurrentProgress,
    RemoteAction::StartSession,
    RemoteAction::PauseSession,
    RemoteAction::ResumeSession,
    RemoteAction::StopSession,
    RemoteAction::EnableStrictLock,
    RemoteAction::DisablePanicKey,
    RemoteAction::Minimize,
    RemoteAction::Restore,
    RemoteAction::AvailableSessions,
    RemoteAction::FindSession,
];

impl RemoteAction {
    /// The full catalog, in tier order.
    pub const ALL: &'static [RemoteAction] = FULL_ACTIONS;

    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteAction::ShowOverlay => "show_overlay",
            RemoteAction::HideOverlay => "hide_overlay",
            RemoteAction::StartAmbient => "start_ambient",
            RemoteAction::StopAmbient => "stop_ambient",
            RemoteAction::TriggerPanic => "trigger_panic",
            RemoteAction::TriggerVideo => "trigger_video",
            RemoteAction::HapticPulse => "haptic_pulse",
            RemoteAction::HapticIntensity => "haptic_intensity",
            RemoteAction::DuckAudio => "duck_audio",
            RemoteAction::UnduckAudio => "unduck_audio",
            RemoteAction::CurrentProgress => "current_progress",
            RemoteAction::StartSession => "start_session",
            RemoteAction::PauseSession => "pause_session",
            RemoteAction::ResumeSession => "resume_session",
            RemoteAction::StopSession => "stop_session",
            RemoteAction::EnableStrictLock => "enable_strict_lock",
            RemoteAction::DisablePanicKey => "disable_panic_key",
            RemoteAction::Minimize => "minimize",
            RemoteAction::Restore => "restore",
            RemoteAction::AvailableSessions => "available_sessions",
            RemoteAction::FindSession => "find_session",
        }
    }

    pub fn kind(self) -> ActionKind {
        match self {
            RemoteAction::TriggerPanic => ActionKind::Panic,
            RemoteAction::CurrentProgress
            | RemoteAction::AvailableSessions
            | RemoteAction::FindSession => ActionKind::Query,
            _ => ActionKind::Direct,
        }
    }

    /// The narrowest tier that allows this action.
    pub fn min_tier(self) -> CapabilityTier {
        CapabilityTier::ALL
            .into_iter()
            .find(|tier| tier.allows(self))
            .unwrap_or(CapabilityTier::Full)
    }

    /// Whether this action is kept out of the local feedback stream.
    ///
    /// Continuous triggers (intensity updates, audio ducking) and polled
    /// queries arrive many times a second and would flood the overlay.
    pub fn suppresses_feedback(self) -> bool {
        matches!(
            self,
            RemoteAction::HapticIntensity
                | RemoteAction::DuckAudio
                | RemoteAction::UnduckAudio
                | RemoteAction::CurrentProgress
                | RemoteAction::AvailableSessions
                | RemoteAction::FindSession
        )
    }

    /// Short operator-facing label.
    pub fn label(self) -> &'static str {
        match self {
            RemoteAction::ShowOverlay => "Overlay shown",
            RemoteAction::HideOverlay => "Overlay hidden",
            RemoteAction::StartAmbient => "Ambient effect started",
            RemoteAction::StopAmbient => "Ambient effect stopped",
            RemoteAction::TriggerPanic => "Panic stop",
            RemoteAction::TriggerVideo => "Video triggered",
            RemoteAction::HapticPulse => "Haptic pulse",
            RemoteAction::HapticIntensity => "Haptic intensity",
            RemoteAction::DuckAudio => "Audio ducked",
            RemoteAction::UnduckAudio => "Audio restored",
            RemoteAction::CurrentProgress => "Progress polled",
            RemoteAction::StartSession => "Session started",
            RemoteAction::PauseSession => "Session paused",
            RemoteAction::ResumeSession => "Session resumed",
            RemoteAction::StopSession => "Session stopped",
            RemoteAction::EnableStrictLock => "Strict lock enabled",
            RemoteAction::DisablePanicKey => "Panic key disabled",
            RemoteAction::Minimize => "Window minimized",
            RemoteAction::Restore => "Window restored",
            RemoteAction::AvailableSessions => "Sessions listed",
            RemoteAction::FindSession => "Session looked up",
        }
    }

    /// Label for the feedback channel, `None` for suppressed actions.
    pub fn feedback_label(self) -> Option<&'static str> {
        if self.suppresses_feedback() {
            None
        } else {
            Some(self.label())
        }
    }
}

impl fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        RemoteAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == name)
            .ok_or_else(|| CoreError::parse(format!("unknown action: {}", name)))
    }
}
