//! Services
//!
//! Business logic for the remote control layer and the headless host that
//! implements its callbacks.

pub mod headless;
pub mod remote;

pub use headless::{HeadlessHost, HostSnapshot};
pub use remote::{ControlSessionManager, HostCallbackRegistry};
