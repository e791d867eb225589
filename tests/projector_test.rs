mod common;

use anyhow::Result;
use common::{fast_options, FakeProjector, FakeState};
use pjlink_ctl::core::state_machine::StateTransition;
use pjlink_ctl::{
    Command, InputSource, LocalStorage, PjlinkError, PowerStatus, PresetManager, Projector,
    ProjectorState,
};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

/// 連線後待機狀態只允許基本查詢，開機後進入 ReadyForUse
#[tokio::test]
async fn test_state_follows_power() -> Result<()> {
    let fake = FakeProjector::start().await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    let mut transitions = projector.subscribe_state();

    projector.connect().await?;
    assert_eq!(projector.state(), ProjectorState::Connected);
    assert!(!projector.is_ready());
    assert!(projector.can_execute(Command::Powr));
    assert!(!projector.can_execute(Command::Inpt));

    // Standby: INPT is never sent to the projector.
    assert!(!fake.received().iter().any(|line| line.starts_with("%1INPT")));

    projector.power_on().await?;
    assert_eq!(projector.state(), ProjectorState::ReadyForUse);
    assert!(projector.is_ready());

    assert_ok!(projector.switch_input(InputSource::Digital).await);
    assert_eq!(projector.client().info().current_input, InputSource::Digital);

    projector.power_off().await?;
    assert_eq!(projector.state(), ProjectorState::Connected);

    projector.disconnect().await;
    assert_eq!(projector.state(), ProjectorState::Disconnected);

    let mut seen = Vec::new();
    while let Ok(StateTransition { to, .. }) = transitions.try_recv() {
        seen.push(to);
    }
    assert_eq!(
        seen,
        vec![
            ProjectorState::Connecting,
            ProjectorState::Connected,
            ProjectorState::ReadyForUse,
            ProjectorState::Connected,
            ProjectorState::Disconnected,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_commands_not_allowed_in_standby() -> Result<()> {
    let fake = FakeProjector::start().await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    projector.connect().await?;

    let result = projector.switch_input(InputSource::Rgb).await;
    assert!(matches!(
        result,
        Err(PjlinkError::CommandNotAllowedError {
            command: Command::Inpt,
            ..
        })
    ));
    // A refused command leaves the state untouched.
    assert_eq!(projector.state(), ProjectorState::Connected);
    Ok(())
}

#[tokio::test]
async fn test_commands_require_connection() {
    let projector = Projector::new(
        pjlink_ctl::ProjectorInfo::new("Offline", "127.0.0.1", 4352),
        fast_options(),
    );
    assert!(matches!(
        projector.power_on().await,
        Err(PjlinkError::NotConnectedError)
    ));
    assert_err!(projector.request_status().await);
}

/// 暖機中只允許 POWR 與 ERST
#[tokio::test]
async fn test_warm_up_moves_to_powering_on() -> Result<()> {
    let fake = FakeProjector::start_with(FakeState {
        warm_up: true,
        ..Default::default()
    })
    .await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    projector.connect().await?;

    projector.power_on().await?;
    assert_eq!(projector.client().info().power_status, PowerStatus::WarmingUp);
    assert_eq!(projector.state(), ProjectorState::PoweringOn);
    assert!(projector.can_execute(Command::Erst));
    assert!(!projector.can_execute(Command::Avmt));

    // Warm-up finished on the device side; the next status poll picks it up.
    fake.update(|s| s.power = '1');
    projector.check_status().await;
    assert_eq!(projector.state(), ProjectorState::ReadyForUse);
    Ok(())
}

#[tokio::test]
async fn test_error_reply_enters_error_state() -> Result<()> {
    let fake = FakeProjector::start_with(FakeState {
        power: '1',
        ..Default::default()
    })
    .await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    projector.connect().await?;
    assert_eq!(projector.state(), ProjectorState::ReadyForUse);

    // Storage is not among the projector's inputs.
    let result = projector.switch_input(InputSource::Storage).await;
    assert!(matches!(result, Err(PjlinkError::CommandRejectedError { .. })));
    assert_eq!(projector.state(), ProjectorState::Error);
    assert!(projector.state_error_message().contains("INPT"));
    assert!(!projector.can_execute(Command::Inpt));

    projector.clear_error().await?;
    assert_eq!(projector.state(), ProjectorState::ReadyForUse);
    assert!(projector.state_error_message().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_check_status_reconnects_dropped_link() -> Result<()> {
    let fake = FakeProjector::start().await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    projector.connect().await?;

    fake.update(|s| s.silent = true);
    assert_err!(projector.request_status().await);
    assert_eq!(projector.state(), ProjectorState::Disconnected);

    fake.update(|s| s.silent = false);
    projector.check_status().await;
    assert!(projector.client().is_connected());
    assert_eq!(projector.state(), ProjectorState::Connected);
    Ok(())
}

/// 預設組態存檔後可重建投影機
#[tokio::test]
async fn test_preset_round_trip() -> Result<()> {
    let fake = FakeProjector::start().await;
    let temp_dir = TempDir::new()?;

    let projector = Projector::new(fake.info("Lobby").with_password("secret"), fast_options());
    let mut presets = PresetManager::new(LocalStorage::new(temp_dir.path()));
    projector.save_as_preset(&mut presets, "lobby")?;
    presets.save().await?;

    let mut reloaded = PresetManager::new(LocalStorage::new(temp_dir.path()));
    assert_eq!(reloaded.load().await?, 1);

    let restored = Projector::from_preset(&reloaded, "lobby", fast_options())?;
    let info = restored.client().info();
    assert_eq!(info.name, "Lobby");
    assert_eq!(info.port, fake.port());
    assert_eq!(info.password, "secret");

    assert!(matches!(
        Projector::from_preset(&reloaded, "missing", fast_options()),
        Err(PjlinkError::PresetError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_diagnostic_report_includes_state() -> Result<()> {
    let fake = FakeProjector::start().await;
    let projector = Projector::new(fake.info("Lobby"), fast_options());
    projector.connect().await?;

    let report = projector.generate_diagnostic_report();
    assert!(report.contains("===== PJLink Diagnostic Report ====="));
    assert!(report.contains("State: Connected"));
    Ok(())
}

#[tokio::test]
async fn test_status_poller_follows_device() -> Result<()> {
    let fake = FakeProjector::start().await;
    let projector = std::sync::Arc::new(Projector::new(fake.info("Lobby"), fast_options()));
    projector.connect().await?;
    let mut transitions = projector.subscribe_state();

    let poller = projector.spawn_status_poller(std::time::Duration::from_millis(10));
    fake.update(|s| s.power = '1');

    let reached = tokio::time::timeout(std::time::Duration::from_secs(3), async {
        while let Ok(transition) = transitions.recv().await {
            if transition.to == ProjectorState::ReadyForUse {
                return true;
            }
        }
        false
    })
    .await?;
    assert!(reached);
    poller.abort();
    Ok(())
}
