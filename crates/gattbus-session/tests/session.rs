use std::sync::{Arc, Mutex};
use std::time::Duration;

use gattbus_link::DeviceHandle;
use gattbus_protocol::group::{GEAR_ADDRESS, SWITCH_ADDRESS, TARGET_TEMP_ADDRESS};
use gattbus_protocol::settings::encode_gear;
use gattbus_protocol::{DeviceSettings, GroupId, RunMode, RunState};
use gattbus_session::{
    Direction, LogChannel, LogEvent, SessionConfig, SessionController, SessionError, SessionPhase,
    SimulatedDevice,
};

fn handle() -> DeviceHandle {
    DeviceHandle::new("AA:BB:CC:DD:EE:01").with_name("heater")
}

fn controller(device: &SimulatedDevice) -> (SessionController, Arc<Mutex<Vec<LogEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let events = events.clone();
        move |event: LogEvent| events.lock().unwrap().push(event)
    };
    let controller = SessionController::with_sink(
        Arc::new(device.factory()),
        SessionConfig::default(),
        Arc::new(sink),
    )
    .unwrap();
    (controller, events)
}

fn logged(events: &Mutex<Vec<LogEvent>>, needle: &str) -> bool {
    events
        .lock()
        .unwrap()
        .iter()
        .any(|event| event.message.contains(needle))
}

fn position(events: &Mutex<Vec<LogEvent>>, needle: &str) -> Option<usize> {
    events
        .lock()
        .unwrap()
        .iter()
        .position(|event| event.message.contains(needle))
}

/// Outbound poll requests logged in `range`.
fn polls(events: &Mutex<Vec<LogEvent>>, range: std::ops::Range<usize>) -> Vec<String> {
    events.lock().unwrap()[range]
        .iter()
        .filter(|event| event.channel == LogChannel::Poll && event.direction == Direction::Outbound)
        .map(|event| event.message.clone())
        .collect()
}

/// Poll `condition` of virtual time for up to a minute.
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..600 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}

#[tokio::test(start_paused = true)]
async fn connect_reaches_ready_and_hydrates() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);

    session.connect(handle()).await.unwrap();

    assert_eq!(session.phase(), SessionPhase::SessionReady);
    assert_eq!(device.connect_count(), 1);
    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.run_state, RunState::Off);
    assert_eq!(snapshot.level, 9);
    assert!(session.mirror().is_hydratable());
    assert_eq!(
        session.mirror().to_settings().unwrap(),
        DeviceSettings::default()
    );
    assert_eq!(
        session.device_info(),
        Some(vec![0x0102, 0x0304, 0x2024, 0x0001])
    );
    assert!(session.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_retries_then_succeeds() {
    let device = SimulatedDevice::new();
    device.fail_next_connects(2);
    let (session, _) = controller(&device);

    session.connect(handle()).await.unwrap();
    assert_eq!(session.phase(), SessionPhase::SessionReady);
    assert_eq!(device.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_all_attempts() {
    let device = SimulatedDevice::new();
    device.fail_next_connects(3);
    let (session, events) = controller(&device);

    let err = session.connect(handle()).await.unwrap_err();
    assert!(matches!(err, SessionError::TransportUnavailable(_)), "{err}");
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(session.last_error(), Some(err));
    assert!(logged(&events, "attempt 3/3"));
    assert_eq!(device.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn wrong_link_budget_is_a_protocol_mismatch() {
    let device = SimulatedDevice::new();
    device.grant_link_budget(Some(185));
    let (session, _) = controller(&device);

    let err = session.connect(handle()).await.unwrap_err();
    assert!(matches!(err, SessionError::ProtocolMismatch(_)), "{err}");
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn missing_device_info_does_not_block_ready() {
    let device = SimulatedDevice::new();
    device.silence_group(GroupId::DeviceInfo);
    let (session, events) = controller(&device);

    session.connect(handle()).await.unwrap();
    assert_eq!(session.phase(), SessionPhase::SessionReady);
    assert_eq!(session.device_info(), None);
    assert!(logged(&events, "optional group device_info unavailable"));
}

#[tokio::test(start_paused = true)]
async fn missing_status_fails_initialization() {
    let device = SimulatedDevice::new();
    device.silence_group(GroupId::Status);
    let (session, _) = controller(&device);

    let err = session.connect(handle()).await.unwrap_err();
    assert!(
        matches!(err, SessionError::InitializationIncomplete(_)),
        "{err}"
    );
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn writes_need_a_session() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    assert_eq!(
        session.set_power(true).await.unwrap_err(),
        SessionError::NotConnected
    );
}

#[tokio::test(start_paused = true)]
async fn set_power_is_verified_and_mirrored() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    let outcome = session.set_power(true).await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.reason());
    assert_eq!(outcome.applied, vec!["power switch"]);
    assert_eq!(device.holding_register(SWITCH_ADDRESS), Some(1));
    assert_eq!(session.mirror().switch, Some(1));
    assert_eq!(session.phase(), SessionPhase::SessionReady);

    assert!(
        wait_for(|| {
            session
                .snapshot()
                .is_some_and(|snapshot| snapshot.run_state == RunState::Running)
        })
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn set_run_mode_writes_the_gear_word() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    let outcome = session.set_run_mode(RunMode::Thermostat, 5).await.unwrap();
    assert!(outcome.is_success());
    let word = encode_gear(RunMode::Thermostat, 5);
    assert_eq!(device.holding_register(GEAR_ADDRESS), Some(word));
    assert_eq!(session.mirror().gear, Some(word));

    let err = session.set_run_mode(RunMode::Manual, 0).await.unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)), "{err}");
}

#[tokio::test(start_paused = true)]
async fn apply_all_settings_commits_every_transaction() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    let mut settings = DeviceSettings::default();
    settings.level = 12;
    settings.target_temp_c = 24;
    settings.tuning.fan_max_rpm = 4200;

    let outcome = session.apply_all_settings(&settings).await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.reason());
    assert_eq!(outcome.applied.len(), 6);
    assert_eq!(session.mirror().to_settings().unwrap(), settings);
    assert_eq!(device.writes().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn apply_all_settings_stops_at_first_mismatch() {
    let device = SimulatedDevice::new();
    let stuck = DeviceSettings::default().target_temp_word();
    device.stick_register(TARGET_TEMP_ADDRESS, stuck);
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    let mut settings = DeviceSettings::default();
    settings.power_on = true;
    settings.level = 4;
    settings.target_temp_c = 30;

    let outcome = session.apply_all_settings(&settings).await.unwrap();
    assert_eq!(outcome.applied, vec!["power switch", "run mode and level"]);
    let failure = outcome.failed.clone().unwrap();
    assert_eq!(failure.title, "target temperature");
    assert!(matches!(failure.error, SessionError::ValidationFailed(_)));
    assert!(outcome
        .reason()
        .unwrap()
        .starts_with("target temperature: validation failed"));

    let mirror = session.mirror();
    assert_eq!(mirror.switch, Some(1));
    assert_eq!(mirror.gear, Some(settings.gear_word()));
    assert_eq!(mirror.target_temp_word, Some(stuck));
    // The sequence stopped before the remaining transactions.
    assert_eq!(device.writes().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_bulk_apply_is_busy() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();
    device.set_response_delay(Duration::from_millis(200));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.apply_all_settings(&DeviceSettings::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = session
        .apply_all_settings(&DeviceSettings::default())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::Busy("apply all settings"));
    assert_eq!(session.phase(), SessionPhase::OptionalWrite);

    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.reason());
    assert_eq!(session.phase(), SessionPhase::SessionReady);
}

#[tokio::test(start_paused = true)]
async fn invalid_frame_streak_triggers_reconnect() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.corrupt_next_responses(5);
    assert!(
        wait_for(|| device.connect_count() == 2 && session.phase() == SessionPhase::SessionReady)
            .await
    );
    assert!(matches!(
        session.last_error(),
        Some(SessionError::FrameInvalid(_))
    ));
    assert!(logged(&events, "reconnecting: consecutive invalid frames"));
}

#[tokio::test(start_paused = true)]
async fn link_drop_triggers_reconnect() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.drop_link();
    assert!(
        wait_for(|| device.connect_count() == 2 && session.phase() == SessionPhase::SessionReady)
            .await
    );
    assert!(matches!(
        session.last_error(),
        Some(SessionError::TransportUnavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn ambiguous_run_state_triggers_reconnect() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    // Power reported with a stopped fan.
    device.set_status_register(1, 30);
    assert!(wait_for(|| device.connect_count() >= 2).await);
    assert!(matches!(
        session.last_error(),
        Some(SessionError::ProtocolMismatch(_))
    ));
    assert!(logged(&events, "reconnecting: consecutive ambiguous run states"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_state_and_suppresses_reconnect() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    session.disconnect().await;
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(session.snapshot().is_none());
    assert!(!session.mirror().is_hydratable());
    assert!(session.device_info().is_none());
    assert!(!device.is_connected());

    device.drop_link();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(device.connect_count(), 1);
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(
        session.set_power(true).await.unwrap_err(),
        SessionError::NotConnected
    );

    session.connect(handle()).await.unwrap();
    assert_eq!(device.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn silence_resubscribes_then_reconnects() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.set_silent(true);
    tokio::time::sleep(Duration::from_secs(90)).await;

    assert!(logged(&events, "notifications silent, resubscribing"));
    assert!(logged(&events, "reconnecting: notifications silent after resubscribe"));
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(matches!(
        session.last_error(),
        Some(SessionError::TransportTimeout(_))
    ));
    assert_eq!(device.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn phase_changes_are_observable() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    let mut phases = session.watch_phase();
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Idle);

    session.connect(handle()).await.unwrap();
    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), SessionPhase::SessionReady);

    session.disconnect().await;
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn mandatory_group_failure_fails_initialization() {
    let device = SimulatedDevice::new();
    device.silence_group(GroupId::Gear);
    let (session, _) = controller(&device);

    let err = session.connect(handle()).await.unwrap_err();
    match &err {
        SessionError::InitializationIncomplete(message) => {
            assert!(message.starts_with("gear: "), "{message}")
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(!device.is_connected());
}

#[tokio::test(start_paused = true)]
async fn single_register_timeout_suspends_until_config_block_read() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.silence_group(GroupId::Gear);
    assert!(wait_for(|| logged(&events, "gear timed out, suspending single-register groups")).await);
    assert!(session.health().await.desync);
    device.restore_group(GroupId::Gear);

    assert!(wait_for(|| logged(&events, "desync cleared")).await);
    assert!(!session.health().await.desync);

    let suspended = position(&events, "suspending single-register groups").unwrap();
    let cleared = position(&events, "desync cleared").unwrap();
    let during = polls(&events, suspended..cleared);
    assert!(during.iter().any(|poll| poll == "read config_block"), "{during:?}");
    for single in ["read switch", "read gear", "read motor_temp_word", "read target_temp_word"] {
        assert!(!during.iter().any(|poll| poll == single), "{single} during desync");
    }
    assert_eq!(device.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn only_status_is_polled_while_writing() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();
    device.set_response_delay(Duration::from_millis(400));

    let outcome = session
        .apply_all_settings(&DeviceSettings::default())
        .await
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.reason());

    let first_write = position(&events, "write power switch").unwrap();
    let last_write = events
        .lock()
        .unwrap()
        .iter()
        .rposition(|event| event.channel == LogChannel::Write)
        .unwrap();
    let during = polls(&events, first_write..last_write);
    assert!(!during.is_empty());
    assert!(during.iter().all(|poll| poll == "read status"), "{during:?}");
}

#[tokio::test(start_paused = true)]
async fn temperature_mismatch_triggers_reconnect() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.set_status_register(8, 150);
    assert!(wait_for(|| device.connect_count() >= 2).await);
    assert_eq!(
        session.last_error(),
        Some(SessionError::ProtocolMismatch(
            "consecutive temperature mismatches".to_string()
        ))
    );
    assert!(logged(&events, "reconnecting: consecutive temperature mismatches"));
}

#[tokio::test(start_paused = true)]
async fn nonzero_constant_fields_trigger_reconnect() {
    let device = SimulatedDevice::new();
    let (session, events) = controller(&device);
    session.connect(handle()).await.unwrap();

    device.set_status_register(6, 3);
    assert!(wait_for(|| device.connect_count() >= 2).await);
    assert_eq!(
        session.last_error(),
        Some(SessionError::ProtocolMismatch(
            "consecutive nonzero constant fields".to_string()
        ))
    );
    assert!(logged(&events, "reconnecting: consecutive nonzero constant fields"));
}

#[tokio::test(start_paused = true)]
async fn disconnect_wins_over_concurrent_drop() {
    let device = SimulatedDevice::new();
    let (session, _) = controller(&device);
    session.connect(handle()).await.unwrap();

    // Build a temperature streak so a health trigger is also pending.
    device.set_status_register(8, 150);
    let mut streaking = false;
    for _ in 0..50 {
        if session.health().await.temperature_mismatches >= 1 {
            streaking = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(streaking);

    let closing = {
        let session = session.clone();
        tokio::spawn(async move { session.disconnect().await })
    };
    device.drop_link();
    closing.await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(device.connect_count(), 1);
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(!device.is_connected());
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_initialization_leaves_no_link() {
    let device = SimulatedDevice::new();
    device.set_response_delay(Duration::from_millis(200));
    let (session, _) = controller(&device);

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(handle()).await })
    };
    assert!(wait_for(|| session.phase() == SessionPhase::Initializing).await);

    session.disconnect().await;
    assert_eq!(connecting.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(!device.is_connected());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(device.connect_count(), 1);
    assert!(!device.is_connected());
}

#[tokio::test(start_paused = true)]
async fn superseded_connect_releases_its_link() {
    let device = SimulatedDevice::new();
    device.set_response_delay(Duration::from_millis(200));
    let (session, _) = controller(&device);

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(handle()).await })
    };
    assert!(wait_for(|| session.phase() == SessionPhase::Initializing).await);

    session.connect(handle()).await.unwrap();
    assert_eq!(first.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(session.phase(), SessionPhase::SessionReady);
    assert_eq!(device.connect_count(), 2);
    assert!(device.is_connected());
}
