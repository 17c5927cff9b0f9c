//! Host Callback Registry
//!
//! Pull-based slots through which the session layer reaches the rest of the
//! application. The core never touches application state directly; it only
//! calls what the host registered here.
//!
//! Slots are keyed by the closed [`RemoteAction`] enum, so an unknown or
//! misspelled name cannot be registered at all. Every invocation clones the
//! callback out of the lock first and runs it under `catch_unwind`, so a
//! panicking host callback surfaces as `CallbackFailed` instead of taking the
//! dispatcher down.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use companion_core::{
    ActionKind, CapabilityTier, RemoteAction, SessionProgressSnapshot, SessionSummary,
};
use serde_json::Value;

use super::types::RemoteError;

/// Direct action entry point. Receives the command payload.
pub type ActionCallback = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;
pub type AvailableSessionsCallback = Arc<dyn Fn() -> Vec<SessionSummary> + Send + Sync>;
pub type CurrentProgressCallback = Arc<dyn Fn() -> Option<SessionProgressSnapshot> + Send + Sync>;
pub type FindSessionCallback = Arc<dyn Fn(&str) -> Option<SessionSummary> + Send + Sync>;
pub type SafetyCallback = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Local safety steps run before the host's panic callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyStep {
    /// Silence all audiovisual output
    HaltOutput,
    /// Force-close modal locked windows
    CloseLockedWindows,
}

impl SafetyStep {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyStep::HaltOutput => "halt_output",
            SafetyStep::CloseLockedWindows => "close_locked_windows",
        }
    }
}

#[derive(Default, Clone)]
struct QuerySlots {
    available_sessions: Option<AvailableSessionsCallback>,
    current_progress: Option<CurrentProgressCallback>,
    find_session: Option<FindSessionCallback>,
}

/// Registry of host callbacks.
///
/// Shared between the host (registers) and the session layer (invokes).
/// Registration may happen before or during a session.
#[derive(Default)]
pub struct HostCallbackRegistry {
    actions: RwLock<HashMap<RemoteAction, ActionCallback>>,
    queries: RwLock<QuerySlots>,
    safety: RwLock<HashMap<SafetyStep, SafetyCallback>>,
}

// Slots stay usable after a thread panicked while holding a guard.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

impl HostCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a direct or panic action.
    ///
    /// Query actions must go through their typed `register_*` method.
    pub fn register_action<F>(&self, action: RemoteAction, callback: F) -> Result<(), RemoteError>
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        if action.kind() == ActionKind::Query {
            return Err(RemoteError::InvalidRegistration(format!(
                "{} is a query, register it with its query slot",
                action
            )));
        }
        write(&self.actions).insert(action, Arc::new(callback));
        Ok(())
    }

    /// Register an action backed by an async host operation.
    ///
    /// The slot spawns the operation on the runtime and returns immediately,
    /// so dispatch never waits on it. The spawned task logs its own failure.
    /// Must be invoked from within a tokio runtime.
    pub fn register_async_action<F, Fut>(
        &self,
        action: RemoteAction,
        operation: F,
    ) -> Result<(), RemoteError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let operation = Arc::new(operation);
        self.register_action(action, move |payload| {
            let fut = operation(payload.clone());
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    tracing::warn!(action = %action, error = %e, "Async host action failed");
                }
            });
            Ok(())
        })
    }

    pub fn register_available_sessions<F>(&self, callback: F)
    where
        F: Fn() -> Vec<SessionSummary> + Send + Sync + 'static,
    {
        write(&self.queries).available_sessions = Some(Arc::new(callback));
    }

    pub fn register_current_progress<F>(&self, callback: F)
    where
        F: Fn() -> Option<SessionProgressSnapshot> + Send + Sync + 'static,
    {
        write(&self.queries).current_progress = Some(Arc::new(callback));
    }

    pub fn register_find_session<F>(&self, callback: F)
    where
        F: Fn(&str) -> Option<SessionSummary> + Send + Sync + 'static,
    {
        write(&self.queries).find_session = Some(Arc::new(callback));
    }

    pub fn register_safety<F>(&self, step: SafetyStep, callback: F)
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        write(&self.safety).insert(step, Arc::new(callback));
    }

    /// Whether `action` has an implementation.
    pub fn has_action(&self, action: RemoteAction) -> bool {
        match action {
            RemoteAction::AvailableSessions => read(&self.queries).available_sessions.is_some(),
            RemoteAction::CurrentProgress => read(&self.queries).current_progress.is_some(),
            RemoteAction::FindSession => read(&self.queries).find_session.is_some(),
            _ => read(&self.actions).contains_key(&action),
        }
    }

    /// Actions `tier` allows that have no implementation.
    pub fn missing_for(&self, tier: CapabilityTier) -> Vec<RemoteAction> {
        tier.allowed_actions()
            .iter()
            .copied()
            .filter(|a| !self.has_action(*a))
            .collect()
    }

    fn action(&self, action: RemoteAction) -> Option<ActionCallback> {
        read(&self.actions).get(&action).cloned()
    }

    /// Invoke the action callback for `action`.
    pub fn invoke_action(&self, action: RemoteAction, payload: &Value) -> Result<(), RemoteError> {
        let callback = self
            .action(action)
            .ok_or(RemoteError::CallbackUnavailable(action))?;

        match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(RemoteError::CallbackFailed { action, message }),
            Err(panic) => Err(RemoteError::CallbackFailed {
                action,
                message: panic_message(panic),
            }),
        }
    }

    /// Answer a query action as JSON.
    ///
    /// `find_session` reads the session id from `payload.id`.
    pub fn run_query(&self, action: RemoteAction, payload: &Value) -> Result<Value, RemoteError> {
        let slots = read(&self.queries).clone();

        let outcome = match action {
            RemoteAction::AvailableSessions => {
                let cb = slots
                    .available_sessions
                    .ok_or(RemoteError::CallbackUnavailable(action))?;
                catch_unwind(AssertUnwindSafe(|| serde_json::to_value(cb())))
            }
            RemoteAction::CurrentProgress => {
                let cb = slots
                    .current_progress
                    .ok_or(RemoteError::CallbackUnavailable(action))?;
                catch_unwind(AssertUnwindSafe(|| serde_json::to_value(cb())))
            }
            RemoteAction::FindSession => {
                let cb = slots
                    .find_session
                    .ok_or(RemoteError::CallbackUnavailable(action))?;
                let id = payload
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RemoteError::InvalidPayload {
                        action,
                        message: "missing string field `id`".to_string(),
                    })?
                    .to_string();
                catch_unwind(AssertUnwindSafe(|| serde_json::to_value(cb(&id))))
            }
            other => {
                return Err(RemoteError::InvalidRegistration(format!(
                    "{} is not a query",
                    other
                )))
            }
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RemoteError::CallbackFailed {
                action,
                message: e.to_string(),
            }),
            Err(panic) => Err(RemoteError::CallbackFailed {
                action,
                message: panic_message(panic),
            }),
        }
    }

    /// Run one safety step. A missing step is `Ok`: nothing to silence.
    pub fn run_safety(&self, step: SafetyStep) -> Result<(), String> {
        let callback = match read(&self.safety).get(&step).cloned() {
            Some(cb) => cb,
            None => return Ok(()),
        };
        match catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic)),
        }
    }

    pub fn has_safety(&self, step: SafetyStep) -> bool {
        read(&self.safety).contains_key(&step)
    }
}
