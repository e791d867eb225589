mod common;

use anyhow::Result;
use common::{fast_options, FakeProjector, FakeState};
use pjlink_ctl::core::manager::{GroupChange, ManagerEvent};
use pjlink_ctl::{
    Command, InputSource, LocalStorage, PjlinkError, PowerStatus, PresetManager, Projector,
    ProjectorInfo, ProjectorManager,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

struct Fleet {
    manager: ProjectorManager<Projector>,
    stage: Vec<FakeProjector>,
    offline_id: String,
}

async fn fleet() -> Fleet {
    let manager = ProjectorManager::new(fast_options());
    let stage = vec![FakeProjector::start().await, FakeProjector::start().await];
    for (index, fake) in stage.iter().enumerate() {
        manager.add_projector(fake.info(&format!("Stage {}", index + 1)), Some("Stage"));
    }

    // Nothing listens on the port once the fake is dropped.
    let gone = FakeProjector::start().await;
    let info = gone.info("Lobby");
    drop(gone);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let offline_id = info.projector_id();
    manager.add_projector(info, Some("Lobby"));

    Fleet {
        manager,
        stage,
        offline_id,
    }
}

/// 批次連線：無法連線的投影機計為失敗
#[tokio::test]
async fn test_connect_all_counts_failures() -> Result<()> {
    let Fleet {
        manager,
        stage,
        offline_id,
    } = fleet().await;

    let result = manager.connect_all().await;
    assert_eq!(result.total_projectors, 3);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert!(result.completed_at.is_some());
    assert!(manager.is_command_completed(&result.command_id));

    let unhealthy = manager.unhealthy_statuses();
    assert_eq!(unhealthy.len(), 1);
    assert_eq!(unhealthy[0].projector_id, offline_id);
    assert_eq!(unhealthy[0].connection_failure_count, 1);

    for fake in &stage {
        let status = manager
            .projector_status(&fake.info("").projector_id())
            .expect("status is tracked");
        assert!(status.is_healthy);
        assert!(status.current.is_connected);
    }
    Ok(())
}

#[tokio::test]
async fn test_group_commands() -> Result<()> {
    let Fleet { manager, stage, .. } = fleet().await;
    manager.connect_all().await;

    let result = manager.power_on_group("Stage").await?;
    assert_eq!(result.group_name, "Stage");
    assert_eq!(result.parameter, "1");
    assert_eq!(result.success_count, 2);
    assert!(stage.iter().all(|fake| fake.state().power == '1'));

    let result = manager.switch_input_group("Stage", InputSource::Digital).await?;
    assert_eq!(result.success_count, 2);
    assert!(stage.iter().all(|fake| fake.state().input == "31"));

    for status in manager.group_statuses("Stage") {
        assert_eq!(status.current.power_status, PowerStatus::PoweredOn);
        assert_eq!(status.current.input_source, InputSource::Digital);
    }

    let latest = manager.latest_group_command_result().expect("result is kept");
    assert_eq!(latest.command_id, result.command_id);
    assert!(manager.group_command_result(&result.command_id).is_some());

    assert!(matches!(
        manager.power_on_group("Missing").await,
        Err(PjlinkError::GroupError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_group_membership_events() -> Result<()> {
    let manager: ProjectorManager<Projector> = ProjectorManager::new(fast_options());
    let mut events = manager.subscribe();

    let info = ProjectorInfo::new("Booth", "127.0.0.1", 4352);
    let id = info.projector_id();
    manager.add_projector(info, Some("Booth"));
    assert!(manager.is_in_group(&id, "Booth"));
    assert!(!manager.create_group("Booth"));

    assert!(manager.create_group("Spare"));
    assert!(manager.add_to_group("Spare", &id));
    assert_eq!(manager.remove_from_all_groups(&id), 2);
    assert!(manager.projectors_in_group("Booth").is_empty());

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ManagerEvent::GroupChanged { group_name, change } = event {
            changes.push((group_name, change));
        }
    }
    assert_eq!(changes[0], ("Booth".to_string(), GroupChange::Created));
    assert!(changes.contains(&("Spare".to_string(), GroupChange::ProjectorAdded(id.clone()))));
    assert!(changes.contains(&("Booth".to_string(), GroupChange::ProjectorRemoved(id))));
    Ok(())
}

/// 群組預設組態：存檔、重新載入並套用電源與輸入
#[tokio::test]
async fn test_group_preset_round_trip() -> Result<()> {
    let Fleet { manager, stage, .. } = fleet().await;
    let temp_dir = TempDir::new()?;
    let mut presets = PresetManager::new(LocalStorage::new(temp_dir.path()));

    manager.connect_group("Stage").await?;
    manager.power_on_group("Stage").await?;
    manager.switch_input_group("Stage", InputSource::Rgb).await?;
    manager
        .save_group_preset(&mut presets, "Show", "Stage", "evening show")
        .await?;

    let stored = presets.group_preset("Show").expect("preset saved");
    assert_eq!(stored.projector_count(), 2);
    assert_eq!(stored.power_status, PowerStatus::PoweredOn);
    assert_eq!(stored.input_source, InputSource::Rgb);

    // Same manager: connected projectors get the stored state back.
    manager.power_off_group("Stage").await?;
    assert!(stage.iter().all(|fake| fake.state().power == '0'));
    let applied = manager.load_group_preset(&presets, "Show").await?;
    assert_eq!(applied, 2);
    assert!(stage.iter().all(|fake| fake.state().power == '1'));
    assert!(stage.iter().all(|fake| fake.state().input == "11"));

    // Fresh manager: the group and its projectors are recreated from disk.
    let mut reloaded = PresetManager::new(LocalStorage::new(temp_dir.path()));
    reloaded.load().await?;
    let fresh: ProjectorManager<Projector> = ProjectorManager::new(fast_options());
    assert_ok!(fresh.load_group_preset(&reloaded, "Show").await);
    assert!(fresh.group_exists("Stage"));
    assert_eq!(fresh.projectors_in_group("Stage").len(), 2);
    assert!(fresh.all_projectors().iter().all(|p| p.client().is_connected()));

    assert!(matches!(
        fresh.load_group_preset(&reloaded, "Unknown").await,
        Err(PjlinkError::PresetError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_update_all_statuses() -> Result<()> {
    let Fleet {
        manager,
        stage,
        offline_id,
    } = fleet().await;
    manager.connect_group("Stage").await?;

    stage[0].update(|s| s.power = '1');
    manager.update_all_statuses().await;

    let status = manager
        .projector_status(&stage[0].info("").projector_id())
        .expect("status is tracked");
    assert_eq!(status.current.power_status, PowerStatus::PoweredOn);
    assert!(!status.history.is_empty());

    let offline = manager.projector_status(&offline_id).expect("status is tracked");
    assert!(!offline.is_healthy);
    assert_eq!(offline.current.error_message, "Connection failed");
    Ok(())
}

#[tokio::test]
async fn test_periodic_status_updates() -> Result<()> {
    let fake = FakeProjector::start().await;
    let manager = std::sync::Arc::new(ProjectorManager::<Projector>::new(fast_options()));
    let info = fake.info("Solo");
    let id = info.projector_id();
    manager.add_projector(info, None);
    manager.connect_all().await;
    fake.update(|s| s.power = '1');

    let mut events = manager.subscribe();
    // Shorter intervals are raised to the one-second minimum.
    let updates = manager.spawn_status_updates(Duration::ZERO);

    let refreshed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(ManagerEvent::StatusChanged(status)) = events.recv().await {
                if status.projector_id == id && status.current.power_status == PowerStatus::PoweredOn {
                    return status;
                }
            }
        }
    })
    .await?;
    assert!(refreshed.is_healthy);

    manager.set_status_updates_enabled(false);
    assert!(!manager.status_updates_enabled());
    updates.abort();
    Ok(())
}

/// 群組指令逾時後，遲到的回覆不會打亂之後的指令
#[tokio::test]
async fn test_late_reply_after_batch_timeout() -> Result<()> {
    let fake = FakeProjector::start_with(FakeState {
        reply_delay: Duration::from_millis(1500),
        ..Default::default()
    })
    .await;
    let mut options = fast_options();
    options.power_on_timeout = Duration::from_secs(5);
    let manager: ProjectorManager<Projector> = ProjectorManager::new(options);
    manager.set_command_timeout(Duration::from_secs(1));
    let info = fake.info("Slow");
    let id = info.projector_id();
    let projector = manager.add_projector(info, None);
    projector.connect().await?;

    let result = manager.power_on_all().await;
    assert_eq!(result.success_count, 0);
    assert_eq!(result.no_response_count, 1);
    assert!(!projector.client().is_connected());

    fake.update(|s| s.reply_delay = Duration::ZERO);
    let reconnected = manager.connect_all().await;
    assert_eq!(reconnected.success_count, 1);
    assert_eq!(projector.client().query(Command::Powr).await?, "1");
    assert_eq!(projector.client().query(Command::Inpt).await?, "31");
    assert!(manager.projector_status(&id).is_some());
    Ok(())
}
