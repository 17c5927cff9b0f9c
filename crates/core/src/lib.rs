//! Companion Core
//!
//! Protocol vocabulary for the Companion remote control session layer. This
//! crate has zero dependencies on application-level code (relay transports,
//! runtime, storage).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `catalog` - Capability tiers, the remote action catalog and feedback labels
//! - `consent` - Per-tier disclosure text and the consent token sessions require
//! - `messages` - Relay message shapes and query result types
//!
//! ## Design Principles
//!
//! 1. **Zero external dependencies beyond serde/thiserror** - keeps build times minimal
//! 2. **Closed enums over strings** - an action name outside the catalog cannot be registered
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod catalog;
pub mod consent;
pub mod error;
pub mod messages;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Catalog ────────────────────────────────────────────────────────────
pub use catalog::{ActionKind, CapabilityTier, RemoteAction};

// ── Consent ────────────────────────────────────────────────────────────
pub use consent::{ConsentDisclosure, TierConsent};

// ── Messages ───────────────────────────────────────────────────────────
pub use messages::{
    InboundCommand, OutboundMessage, RelayRegistration, SessionProgressSnapshot, SessionSummary,
};
