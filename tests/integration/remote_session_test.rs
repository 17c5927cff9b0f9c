//! Remote Control Session Integration Tests
//!
//! Drives `ControlSessionManager` end to end: loopback relay as the peer's
//! side, headless host (or a recording registry) as the application.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use companion_desktop::services::headless::HeadlessHost;
use companion_desktop::services::remote::{
    ControlSessionEvent, ControlSessionManager, EndReason, HostCallbackRegistry, LoopbackRelay,
    RemoteError, SafetyStep, SessionCode, SessionSettings,
};
use companion_desktop::{CapabilityTier, ConsentDisclosure, RemoteAction, TierConsent};
use companion_core::{ActionKind, InboundCommand, OutboundMessage};
use serde_json::json;
use tokio::sync::broadcast;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    manager: ControlSessionManager,
    relay: Arc<LoopbackRelay>,
    host: HeadlessHost,
    events: broadcast::Receiver<ControlSessionEvent>,
}

fn consent(tier: CapabilityTier) -> TierConsent {
    TierConsent::accept(&ConsentDisclosure::for_tier(tier))
}

fn harness_with(settings: SessionSettings) -> Harness {
    let relay = Arc::new(LoopbackRelay::new());
    let registry = Arc::new(HostCallbackRegistry::new());
    let host = HeadlessHost::default();
    host.install(&registry).unwrap();
    let manager = ControlSessionManager::new(relay.clone(), registry, settings);
    let events = manager.subscribe();
    Harness {
        manager,
        relay,
        host,
        events,
    }
}

fn harness() -> Harness {
    harness_with(SessionSettings::default())
}

async fn next_event(events: &mut broadcast::Receiver<ControlSessionEvent>) -> ControlSessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Sends a feedback-producing command and waits for its feedback, so every
/// command queued before it has been dispatched.
async fn flush(h: &mut Harness, code: &SessionCode) {
    assert!(h.relay.send_command(code, InboundCommand::bare("show_overlay")).await);
    loop {
        if let ControlSessionEvent::CommandReceived {
            action: RemoteAction::ShowOverlay,
            ..
        } = next_event(&mut h.events).await
        {
            return;
        }
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// Registry whose every callback appends its name to a shared log.
fn recording_registry() -> (Arc<HostCallbackRegistry>, Log) {
    let registry = Arc::new(HostCallbackRegistry::new());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    for action in RemoteAction::ALL {
        if action.kind() == ActionKind::Query {
            continue;
        }
        let action = *action;
        let log = log.clone();
        registry
            .register_action(action, move |_| {
                log.lock().unwrap().push(action.as_str().to_string());
                Ok(())
            })
            .unwrap();
    }
    for step in [SafetyStep::HaltOutput, SafetyStep::CloseLockedWindows] {
        let log = log.clone();
        registry.register_safety(step, move || {
            log.lock().unwrap().push(step.as_str().to_string());
            Ok(())
        });
    }
    (registry, log)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_light_tier_drops_full_actions_and_runs_light_ones() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();

    assert!(h.relay.connect_peer(&code).await);
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::ControllerConnectionChanged { connected: true }
    );

    assert!(h.relay.send_command(&code, InboundCommand::bare("start_session")).await);
    assert!(h.relay.send_command(&code, InboundCommand::bare("show_overlay")).await);

    // The first feedback is for show_overlay: start_session produced none
    match next_event(&mut h.events).await {
        ControlSessionEvent::CommandReceived { action, label, hide_after_ms } => {
            assert_eq!(action, RemoteAction::ShowOverlay);
            assert_eq!(label, "Overlay shown");
            assert_eq!(hide_after_ms, 2000);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let snapshot = h.host.snapshot();
    assert!(snapshot.overlay_visible);
    assert!(snapshot.running_session.is_none());

    let status = h.manager.status().await;
    assert_eq!(status.total_commands_processed, 1);
    assert_eq!(status.dropped_commands, 1);
}

#[tokio::test]
async fn test_full_pause_with_nothing_running_is_noop() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Full)).await.unwrap();
    assert!(h.relay.connect_peer(&code).await);
    next_event(&mut h.events).await;

    assert!(h.relay.send_command(&code, InboundCommand::bare("pause_session")).await);
    assert!(matches!(
        next_event(&mut h.events).await,
        ControlSessionEvent::CommandReceived {
            action: RemoteAction::PauseSession,
            ..
        }
    ));

    assert!(h.manager.is_active().await);
    assert!(h.host.snapshot().running_session.is_none());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_full_tier_drives_local_session() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Full)).await.unwrap();

    h.relay
        .send_command(&code, InboundCommand::new("start_session", json!({"id": "deep-work-50"})))
        .await;
    h.relay
        .send_command(&code, InboundCommand::bare("pause_session"))
        .await;
    h.relay
        .send_command(&code, InboundCommand::bare("current_progress"))
        .await;
    flush(&mut h, &code).await;

    let snapshot = h.host.snapshot();
    assert_eq!(snapshot.running_session.as_deref(), Some("deep-work-50"));
    assert!(snapshot.paused);

    let published = h.relay.published(&code);
    let progress = published
        .iter()
        .find_map(|m| match m {
            OutboundMessage::QueryResult {
                action: RemoteAction::CurrentProgress,
                data,
            } => Some(data.clone()),
            _ => None,
        })
        .expect("progress was published");
    assert_eq!(progress["name"], "Deep Work");
    assert_eq!(progress["is_paused"], true);
    assert_eq!(progress["current_phase_name"], "Warmup");
}

#[tokio::test]
async fn test_available_sessions_query_is_full_only() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Standard)).await.unwrap();
    h.relay
        .send_command(&code, InboundCommand::bare("available_sessions"))
        .await;
    flush(&mut h, &code).await;
    assert!(h.relay.published(&code).is_empty());

    h.manager.change_tier(consent(CapabilityTier::Full)).await.unwrap();
    let code = h.manager.current_code().await.unwrap();
    h.relay
        .send_command(&code, InboundCommand::bare("available_sessions"))
        .await;
    flush(&mut h, &code).await;
    match h.relay.published(&code).first() {
        Some(OutboundMessage::QueryResult { action, data }) => {
            assert_eq!(*action, RemoteAction::AvailableSessions);
            assert_eq!(data.as_array().map(Vec::len), Some(3));
        }
        other => panic!("unexpected publish: {:?}", other),
    }
}

// ============================================================================
// Lifecycle Properties
// ============================================================================

#[tokio::test]
async fn test_double_stop_ends_once() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();

    assert!(h.manager.stop().await);
    assert!(!h.manager.stop().await);

    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::SessionEnded {
            reason: EndReason::UserStopped
        }
    );
    assert!(h.events.try_recv().is_err());
    assert!(!h.relay.is_registered(&code));
    assert!(!h.relay.send_command(&code, InboundCommand::bare("show_overlay")).await);
}

#[tokio::test]
async fn test_stop_with_peer_reports_disconnect_then_end() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    h.relay.connect_peer(&code).await;
    next_event(&mut h.events).await;

    h.manager.stop().await;
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::ControllerConnectionChanged { connected: false }
    );
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::SessionEnded {
            reason: EndReason::UserStopped
        }
    );
}

#[tokio::test]
async fn test_controller_connected_only_after_signal() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Standard)).await.unwrap();

    assert!(!h.manager.controller_connected().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.manager.controller_connected().await);
    assert!(!h.manager.status().await.controller_connected);

    h.relay.connect_peer(&code).await;
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::ControllerConnectionChanged { connected: true }
    );
    assert!(h.manager.controller_connected().await);

    // Repeated signal is not a change
    h.relay.connect_peer(&code).await;
    h.relay.disconnect_peer(&code).await;
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::ControllerConnectionChanged { connected: false }
    );

    // Detaching never ends the session
    assert!(h.manager.is_active().await);
    h.relay.connect_peer(&code).await;
    next_event(&mut h.events).await;
    assert!(h.manager.controller_connected().await);
}

#[tokio::test]
async fn test_change_tier_issues_fresh_code() {
    let mut h = harness();
    let old = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    let new = h.manager.change_tier(consent(CapabilityTier::Full)).await.unwrap();

    assert_ne!(old, new);
    assert!(!h.relay.is_registered(&old));
    assert!(!h.relay.send_command(&old, InboundCommand::bare("show_overlay")).await);
    assert_eq!(h.relay.registered_tier(&new), Some(CapabilityTier::Full));
    assert_eq!(h.relay.active_codes(), vec![new.clone()]);

    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::SessionEnded {
            reason: EndReason::TierChanged
        }
    );
    assert_eq!(h.manager.status().await.tier, Some(CapabilityTier::Full));

    let published = h.relay.published(&old);
    assert!(published.contains(&OutboundMessage::SessionEnded {
        reason: "tier_changed".to_string()
    }));
}

#[tokio::test]
async fn test_relay_unavailable_is_retryable() {
    let h = harness();
    h.relay.set_available(false);

    let err = h.manager.start(consent(CapabilityTier::Light)).await.unwrap_err();
    assert!(matches!(err, RemoteError::RelayUnavailable(_)));
    assert!(!h.manager.is_active().await);
    assert!(h.manager.current_code().await.is_none());

    h.relay.set_available(true);
    let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    assert!(h.relay.is_registered(&code));
}

#[tokio::test]
async fn test_relay_loss_ends_session() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    h.relay.connect_peer(&code).await;
    next_event(&mut h.events).await;

    h.relay.drop_registration(&code);
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::ControllerConnectionChanged { connected: false }
    );
    assert_eq!(
        next_event(&mut h.events).await,
        ControlSessionEvent::SessionEnded {
            reason: EndReason::RelayLost
        }
    );
    assert!(!h.manager.is_active().await);
}

// ============================================================================
// Expiry
// ============================================================================

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Reason carried by the first `SessionEnded` event.
async fn ended_reason(h: &mut Harness) -> EndReason {
    loop {
        if let ControlSessionEvent::SessionEnded { reason } = next_event(&mut h.events).await {
            return reason;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_expires_at_fixed_deadline() {
    let mut h = harness();
    let first = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();

    tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
    h.relay.connect_peer(&first).await;
    h.relay.send_command(&first, InboundCommand::bare("show_overlay")).await;
    h.relay.disconnect_peer(&first).await;
    h.relay.connect_peer(&first).await;
    settle().await;

    // Activity and reconnects do not move the deadline
    tokio::time::advance(Duration::from_secs(2 * 60 * 60 - 1)).await;
    settle().await;
    assert!(h.manager.is_active().await);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(ended_reason(&mut h).await, EndReason::Expired);
    assert!(!h.manager.is_active().await);

    let second = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    assert_ne!(first, second);
    assert!(h.relay.is_registered(&second));
    assert!(!h.relay.is_registered(&first));
}

#[tokio::test(start_paused = true)]
async fn test_old_expiry_timer_cannot_end_new_session() {
    let mut settings = SessionSettings::default();
    settings.session_ttl = Duration::from_secs(600);
    let mut h = harness_with(settings);

    h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
    tokio::time::advance(Duration::from_secs(500)).await;
    let second = h.manager.change_tier(consent(CapabilityTier::Standard)).await.unwrap();

    // Past the first session's deadline, well before the second's
    tokio::time::advance(Duration::from_secs(200)).await;
    settle().await;
    assert_eq!(h.manager.current_code().await, Some(second));

    assert_eq!(ended_reason(&mut h).await, EndReason::TierChanged);

    tokio::time::advance(Duration::from_secs(400)).await;
    assert_eq!(ended_reason(&mut h).await, EndReason::Expired);
    assert!(!h.manager.is_active().await);
}

// ============================================================================
// Dispatch Guarantees
// ============================================================================

#[tokio::test]
async fn test_disallowed_commands_never_reach_callbacks() {
    let (registry, log) = recording_registry();
    let relay = Arc::new(LoopbackRelay::new());
    let manager = ControlSessionManager::new(relay.clone(), registry, SessionSettings::default());
    let mut events = manager.subscribe();
    let code = manager.start(consent(CapabilityTier::Light)).await.unwrap();

    let rejected = [
        InboundCommand::bare("start_session"),
        InboundCommand::new("disable_panic_key", json!({"force": true})),
        InboundCommand::new("haptic_pulse", json!(42)),
        InboundCommand::bare("SHOW_OVERLAY"),
        InboundCommand::bare("rm -rf"),
        InboundCommand::bare(""),
    ];
    for command in rejected.iter().cloned() {
        assert!(relay.send_command(&code, command).await);
    }
    relay.send_command(&code, InboundCommand::bare("hide_overlay")).await;

    assert!(matches!(
        next_event(&mut events).await,
        ControlSessionEvent::CommandReceived {
            action: RemoteAction::HideOverlay,
            ..
        }
    ));
    assert_eq!(*log.lock().unwrap(), vec!["hide_overlay".to_string()]);
    assert_eq!(
        manager.status().await.dropped_commands,
        rejected.len() as u64
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_preempts_pending_commands() {
    let (registry, log) = recording_registry();

    // First command blocks the dispatcher until released
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let blocked_log = log.clone();
    registry
        .register_action(RemoteAction::StartAmbient, move |_| {
            let _ = release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            blocked_log.lock().unwrap().push("start_ambient".to_string());
            Ok(())
        })
        .unwrap();

    let relay = Arc::new(LoopbackRelay::new());
    let manager = ControlSessionManager::new(relay.clone(), registry, SessionSettings::default());
    let code = manager.start(consent(CapabilityTier::Light)).await.unwrap();

    relay.send_command(&code, InboundCommand::bare("start_ambient")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    relay.send_command(&code, InboundCommand::bare("show_overlay")).await;
    relay.send_command(&code, InboundCommand::bare("hide_overlay")).await;
    relay.send_command(&code, InboundCommand::bare("trigger_panic")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    release_tx.send(()).unwrap();

    for _ in 0..50 {
        if log.lock().unwrap().len() >= 7 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start_ambient",
            "halt_output",
            "close_locked_windows",
            "restore",
            "trigger_panic",
            "show_overlay",
            "hide_overlay",
        ]
    );
}

#[tokio::test]
async fn test_remote_panic_restores_safe_state() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Full)).await.unwrap();

    for action in ["enable_strict_lock", "start_ambient", "minimize", "duck_audio"] {
        h.relay.send_command(&code, InboundCommand::bare(action)).await;
    }
    h.relay
        .send_command(&code, InboundCommand::new("start_session", json!({"id": "focus-25"})))
        .await;
    flush(&mut h, &code).await;
    assert!(h.host.snapshot().strict_lock);

    h.relay.send_command(&code, InboundCommand::bare("trigger_panic")).await;
    h.relay.send_command(&code, InboundCommand::bare("hide_overlay")).await;

    loop {
        if let ControlSessionEvent::CommandReceived {
            action: RemoteAction::HideOverlay,
            ..
        } = next_event(&mut h.events).await
        {
            break;
        }
    }

    let snapshot = h.host.snapshot();
    assert!(!snapshot.strict_lock);
    assert!(!snapshot.ambient_active);
    assert!(!snapshot.minimized);
    assert!(!snapshot.audio_ducked);
    assert!(snapshot.running_session.is_none());
    assert!(h.manager.is_active().await);
}

#[tokio::test]
async fn test_local_panic_during_session() {
    let mut h = harness();
    let code = h.manager.start(consent(CapabilityTier::Full)).await.unwrap();
    h.relay.send_command(&code, InboundCommand::bare("minimize")).await;
    flush(&mut h, &code).await;
    assert!(h.host.snapshot().minimized);

    h.manager.trigger_local_panic().await;
    flush(&mut h, &code).await;

    assert!(!h.host.snapshot().minimized);
    assert!(h.manager.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_remote_panic_racing_expiry_still_runs() {
    let mut settings = SessionSettings::default();
    settings.session_ttl = Duration::from_secs(600);
    let (registry, log) = recording_registry();
    let relay = Arc::new(LoopbackRelay::new());
    let manager = ControlSessionManager::new(relay.clone(), registry, settings);
    let mut events = manager.subscribe();
    let code = manager.start(consent(CapabilityTier::Full)).await.unwrap();

    tokio::time::advance(Duration::from_secs(599)).await;
    assert!(relay.send_command(&code, InboundCommand::bare("trigger_panic")).await);
    tokio::time::advance(Duration::from_secs(1)).await;

    loop {
        if let ControlSessionEvent::SessionEnded { reason } = next_event(&mut events).await {
            assert_eq!(reason, EndReason::Expired);
            break;
        }
    }

    let log = log.lock().unwrap().clone();
    for step in ["halt_output", "close_locked_windows", "restore", "trigger_panic"] {
        assert_eq!(log.iter().filter(|entry| *entry == step).count(), 1, "{}", step);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_connection_event_after_session_end() {
    for _ in 0..20 {
        let mut h = harness();
        let code = h.manager.start(consent(CapabilityTier::Light)).await.unwrap();
        h.relay.connect_peer(&code).await;
        assert!(h.manager.stop().await);

        let mut seen = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.last(),
            Some(&ControlSessionEvent::SessionEnded {
                reason: EndReason::UserStopped
            })
        );
        let connection: Vec<bool> = seen
            .iter()
            .filter_map(|event| match event {
                ControlSessionEvent::ControllerConnectionChanged { connected } => Some(*connected),
                _ => None,
            })
            .collect();
        assert!(
            matches!(connection.as_slice(), [] | [true, false]),
            "{:?}",
            connection
        );
    }
}
