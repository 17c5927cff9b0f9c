//! Remote Control Session
//!
//! Lets one remote peer drive a running desktop session through a relay,
//! limited to the capability tier the local user consented to.
//!
//! ## Architecture
//!
//! ```text
//! Remote Peer → RelayChannel → RelaySubscription → event pump
//!                                                     ↓ try_send
//!                                     panic lane / normal lane (biased)
//!                                                     ↓
//!                                     CommandRouter.route() (tier gate)
//!                                                     ↓
//!                                     HostCallbackRegistry → host app
//!                                                     ↓
//!                      ControlSessionNotifier → UI    RelayChannel.publish() → peer
//! ```
//!
//! `ControlSessionManager` owns the lifecycle: it issues the code, spawns the
//! pump, dispatcher and expiry tasks, and tears all three down through one
//! cancellation token per session.

pub mod callbacks;
pub mod code_issuer;
pub mod command_router;
pub mod notifier;
pub mod relay;
pub mod session;
pub mod types;

pub use callbacks::{HostCallbackRegistry, SafetyStep};
pub use code_issuer::SessionCodeIssuer;
pub use command_router::{CommandRouter, RouteOutcome};
pub use notifier::{ControlSessionEvent, ControlSessionNotifier};
pub use relay::loopback::LoopbackRelay;
pub use relay::websocket::WebSocketRelay;
pub use relay::{RelayChannel, RelayEvent, RelaySubscription};
pub use session::{ControlSessionManager, SessionSettings};
pub use types::*;
