//! Companion Desktop - Remote Control Library
//!
//! Session layer that lets one remote peer drive the desktop companion over
//! a relay, gated by capability tiers and explicit consent.
//! It includes:
//! - The remote control session manager, router and host callback registry
//! - Relay adapters (WebSocket and in-process loopback)
//! - A headless host implementing every callback
//! - Configuration storage, logging and utilities

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use companion_core::{CapabilityTier, ConsentDisclosure, RemoteAction, TierConsent};
pub use models::settings::{RemoteControlConfig, RemoteControlSettingsUpdate};
pub use services::remote::{
    ControlSessionEvent, ControlSessionManager, EndReason, HostCallbackRegistry, RemoteError,
    SessionCode, SessionSettings,
};
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};
