//! Headless Host
//!
//! A minimal in-process host for the remote control layer: a fixed catalogue
//! of timed sessions, a local player, and effect callbacks that only record
//! and log what they would render. Used by the `companion-desktop` binary
//! and by tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use companion_core::{RemoteAction, SessionProgressSnapshot, SessionSummary};
use serde_json::Value;

use super::remote::callbacks::{HostCallbackRegistry, SafetyStep};
use super::remote::types::RemoteError;

/// A named phase inside a timed session.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub name: String,
    pub seconds: u64,
}

/// A session the host can run locally.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSession {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub phases: Vec<Phase>,
}

impl TimedSession {
    pub fn total_seconds(&self) -> u64 {
        self.phases.iter().map(|p| p.seconds).sum()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            total_seconds: self.total_seconds(),
        }
    }

    fn phase_at(&self, elapsed: u64) -> Option<&Phase> {
        let mut end = 0;
        for phase in &self.phases {
            end += phase.seconds;
            if elapsed < end {
                return Some(phase);
            }
        }
        self.phases.last()
    }
}

fn phase(name: &str, minutes: u64) -> Phase {
    Phase {
        name: name.to_string(),
        seconds: minutes * 60,
    }
}

/// Built-in catalogue.
pub fn default_catalogue() -> Vec<TimedSession> {
    vec![
        TimedSession {
            id: "focus-25".to_string(),
            name: "Focus Sprint".to_string(),
            icon: Some("timer".to_string()),
            phases: vec![phase("Settle", 2), phase("Focus", 20), phase("Wind down", 3)],
        },
        TimedSession {
            id: "deep-work-50".to_string(),
            name: "Deep Work".to_string(),
            icon: Some("brain".to_string()),
            phases: vec![phase("Warmup", 5), phase("Deep work", 40), phase("Review", 5)],
        },
        TimedSession {
            id: "breathing-5".to_string(),
            name: "Breathing Break".to_string(),
            icon: None,
            phases: vec![phase("Breathe", 5)],
        },
    ]
}

/// Local player state.
#[derive(Debug, Clone)]
pub enum PlayerState {
    Idle,
    Running {
        session: TimedSession,
        resumed_at: Instant,
        banked: Duration,
    },
    Paused {
        session: TimedSession,
        banked: Duration,
    },
}

/// Observable host state, for the binary's status line and for tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSnapshot {
    pub running_session: Option<String>,
    pub paused: bool,
    pub overlay_visible: bool,
    pub ambient_active: bool,
    pub audio_ducked: bool,
    pub strict_lock: bool,
    pub panic_key_enabled: bool,
    pub minimized: bool,
    pub haptic_intensity: f64,
    pub videos_triggered: u32,
    pub haptic_pulses: u32,
}

struct HostState {
    player: PlayerState,
    effects: HostSnapshot,
}

/// Headless implementation of every host callback.
#[derive(Clone)]
pub struct HeadlessHost {
    catalogue: Arc<Vec<TimedSession>>,
    state: Arc<Mutex<HostState>>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(default_catalogue())
    }
}

impl HeadlessHost {
    pub fn new(catalogue: Vec<TimedSession>) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
            state: Arc::new(Mutex::new(HostState {
                player: PlayerState::Idle,
                effects: HostSnapshot {
                    panic_key_enabled: true,
                    ..Default::default()
                },
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn available_sessions(&self) -> Vec<SessionSummary> {
        self.catalogue.iter().map(TimedSession::summary).collect()
    }

    pub fn find_session(&self, id: &str) -> Option<SessionSummary> {
        self.catalogue
            .iter()
            .find(|s| s.id == id)
            .map(TimedSession::summary)
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let state = self.lock();
        let mut snapshot = state.effects.clone();
        match &state.player {
            PlayerState::Idle => {}
            PlayerState::Running { session, .. } => {
                snapshot.running_session = Some(session.id.clone());
            }
            PlayerState::Paused { session, .. } => {
                snapshot.running_session = Some(session.id.clone());
                snapshot.paused = true;
            }
        }
        snapshot
    }

    /// Live progress of the local session, clamped to its length.
    pub fn current_progress(&self) -> Option<SessionProgressSnapshot> {
        let state = self.lock();
        let (session, elapsed, is_paused) = match &state.player {
            PlayerState::Idle => return None,
            PlayerState::Running {
                session,
                resumed_at,
                banked,
            } => (session, *banked + resumed_at.elapsed(), false),
            PlayerState::Paused { session, banked } => (session, *banked, true),
        };
        let total = session.total_seconds();
        let elapsed = elapsed.as_secs().min(total);
        Some(SessionProgressSnapshot {
            name: session.name.clone(),
            icon: session.icon.clone(),
            elapsed_seconds: elapsed,
            total_seconds: total,
            is_paused,
            current_phase_name: session.phase_at(elapsed).map(|p| p.name.clone()),
        })
    }

    /// Start a session by id, or the first catalogue entry without one.
    ///
    /// A session already running or paused is left alone.
    pub fn start_session(&self, id: Option<&str>) -> Result<(), String> {
        let session = match id {
            Some(id) => self.catalogue.iter().find(|s| s.id == id),
            None => self.catalogue.first(),
        }
        .cloned()
        .ok_or_else(|| format!("no session with id {:?}", id))?;

        let mut state = self.lock();
        if !matches!(state.player, PlayerState::Idle) {
            tracing::info!(session = %session.id, "Start ignored, a session is already loaded");
            return Ok(());
        }
        tracing::info!(session = %session.id, "Local session started");
        state.player = PlayerState::Running {
            session,
            resumed_at: Instant::now(),
            banked: Duration::ZERO,
        };
        Ok(())
    }

    pub fn pause_session(&self) {
        let mut state = self.lock();
        let next = match &state.player {
            PlayerState::Running {
                session,
                resumed_at,
                banked,
            } => PlayerState::Paused {
                session: session.clone(),
                banked: *banked + resumed_at.elapsed(),
            },
            _ => {
                tracing::debug!("Pause ignored, nothing running");
                return;
            }
        };
        state.player = next;
    }

    pub fn resume_session(&self) {
        let mut state = self.lock();
        let next = match &state.player {
            PlayerState::Paused { session, banked } => PlayerState::Running {
                session: session.clone(),
                resumed_at: Instant::now(),
                banked: *banked,
            },
            _ => {
                tracing::debug!("Resume ignored, nothing paused");
                return;
            }
        };
        state.player = next;
    }

    pub fn stop_session(&self) {
        let mut state = self.lock();
        if !matches!(state.player, PlayerState::Idle) {
            tracing::info!("Local session stopped");
        }
        state.player = PlayerState::Idle;
    }

    fn effect(&self, action: RemoteAction, payload: &Value) -> Result<(), String> {
        let mut state = self.lock();
        let fx = &mut state.effects;
        match action {
            RemoteAction::ShowOverlay => fx.overlay_visible = true,
            RemoteAction::HideOverlay => fx.overlay_visible = false,
            RemoteAction::StartAmbient => fx.ambient_active = true,
            RemoteAction::StopAmbient => fx.ambient_active = false,
            RemoteAction::TriggerVideo => fx.videos_triggered += 1,
            RemoteAction::HapticPulse => fx.haptic_pulses += 1,
            RemoteAction::HapticIntensity => {
                let level = payload
                    .get("level")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| "haptic_intensity needs a numeric `level`".to_string())?;
                fx.haptic_intensity = level.clamp(0.0, 1.0);
            }
            RemoteAction::DuckAudio => fx.audio_ducked = true,
            RemoteAction::UnduckAudio => fx.audio_ducked = false,
            RemoteAction::EnableStrictLock => fx.strict_lock = true,
            RemoteAction::DisablePanicKey => fx.panic_key_enabled = false,
            RemoteAction::Minimize => fx.minimized = true,
            RemoteAction::Restore => fx.minimized = false,
            other => return Err(format!("{} is not an effect", other)),
        }
        tracing::info!(action = %action, "Effect applied");
        Ok(())
    }

    fn halt_output(&self) {
        let mut state = self.lock();
        let fx = &mut state.effects;
        fx.overlay_visible = false;
        fx.ambient_active = false;
        fx.audio_ducked = false;
        fx.haptic_intensity = 0.0;
    }

    fn close_locked_windows(&self) {
        self.lock().effects.strict_lock = false;
    }

    /// Register every callback this host implements.
    pub fn install(&self, registry: &HostCallbackRegistry) -> Result<(), RemoteError> {
        for action in [
            RemoteAction::ShowOverlay,
            RemoteAction::HideOverlay,
            RemoteAction::StartAmbient,
            RemoteAction::StopAmbient,
            RemoteAction::TriggerVideo,
            RemoteAction::HapticPulse,
            RemoteAction::HapticIntensity,
            RemoteAction::DuckAudio,
            RemoteAction::UnduckAudio,
            RemoteAction::EnableStrictLock,
            RemoteAction::DisablePanicKey,
            RemoteAction::Minimize,
            RemoteAction::Restore,
        ] {
            let host = self.clone();
            registry.register_action(action, move |payload| host.effect(action, payload))?;
        }

        let host = self.clone();
        registry.register_action(RemoteAction::StartSession, move |payload| {
            host.start_session(payload.get("id").and_then(Value::as_str))
        })?;
        let host = self.clone();
        registry.register_action(RemoteAction::PauseSession, move |_| {
            host.pause_session();
            Ok(())
        })?;
        let host = self.clone();
        registry.register_action(RemoteAction::ResumeSession, move |_| {
            host.resume_session();
            Ok(())
        })?;
        let host = self.clone();
        registry.register_action(RemoteAction::StopSession, move |_| {
            host.stop_session();
            Ok(())
        })?;
        let host = self.clone();
        registry.register_action(RemoteAction::TriggerPanic, move |_| {
            host.stop_session();
            tracing::warn!("Safety stop complete");
            Ok(())
        })?;

        let host = self.clone();
        registry.register_safety(SafetyStep::HaltOutput, move || {
            host.halt_output();
            Ok(())
        });
        let host = self.clone();
        registry.register_safety(SafetyStep::CloseLockedWindows, move || {
            host.close_locked_windows();
            Ok(())
        });

        let host = self.clone();
        registry.register_available_sessions(move || host.available_sessions());
        let host = self.clone();
        registry.register_current_progress(move || host.current_progress());
        let host = self.clone();
        registry.register_find_session(move |id| host.find_session(id));

        Ok(())
    }
}
