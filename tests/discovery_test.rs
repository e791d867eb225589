mod common;

use anyhow::Result;
use common::{FakeProjector, FakeState};
use pjlink_ctl::core::manager::ProjectorManager;
use pjlink_ctl::{
    DeviceClass, DiscoveryEvent, DiscoveryManager, DiscoverySettings, LocalStorage, PjlinkError,
    PresetManager, Projector,
};
use std::net::Ipv4Addr;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_err;

const LOCALHOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

fn settings_for(fake: &FakeProjector) -> DiscoverySettings {
    DiscoverySettings {
        port: fake.port(),
        per_address_wait: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

/// 範圍掃描找到本機的模擬投影機
#[tokio::test]
async fn test_range_scan_finds_projector() -> Result<()> {
    let fake = FakeProjector::start_with(FakeState {
        class: '2',
        ..Default::default()
    })
    .await;
    let discovery = DiscoveryManager::new(settings_for(&fake));
    let mut events = discovery.subscribe();

    let id = discovery
        .start_range_scan(LOCALHOST, LOCALHOST, Duration::from_secs(5))
        .await?;
    let results = discovery.wait_for_completion(&id).await.expect("known run");

    assert_eq!(results.len(), 1);
    let found = &results[0];
    assert_eq!(found.ip_address, "127.0.0.1");
    assert_eq!(found.port, fake.port());
    assert_eq!(found.name, "Fake Projector");
    assert_eq!(found.model_name, "PJ-1000");
    assert_eq!(found.device_class, DeviceClass::Class2);
    assert!(!found.requires_authentication);

    let status = discovery.status(&id).expect("status is kept");
    assert!(status.is_complete);
    assert!(!status.was_cancelled);
    assert_eq!(status.scanned_addresses, 1);
    assert_eq!(status.discovered_devices, 1);
    assert_eq!(status.percentage, 100.0);

    let mut discovered = 0;
    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            DiscoveryEvent::DeviceDiscovered { discovery_id, .. } => {
                assert_eq!(discovery_id, id);
                discovered += 1;
            }
            DiscoveryEvent::Completed { results, success, .. } => completed.push((results.len(), success)),
            DiscoveryEvent::Progress(_) => {}
        }
    }
    assert_eq!(discovered, 1);
    assert_eq!(completed, vec![(1, true)]);

    discovery.clear_completed();
    assert!(discovery.status(&id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_protected_projector_is_flagged() -> Result<()> {
    let fake = FakeProjector::start_with(FakeState {
        password: Some("secret".to_string()),
        ..Default::default()
    })
    .await;
    let discovery = DiscoveryManager::new(settings_for(&fake));

    let id = discovery
        .start_range_scan(LOCALHOST, LOCALHOST, Duration::from_secs(5))
        .await?;
    let results = discovery.wait_for_completion(&id).await.unwrap_or_default();

    assert_eq!(results.len(), 1);
    assert!(results[0].requires_authentication);
    assert!(results[0].name.is_empty());
    // Nothing but the greeting is exchanged with a protected projector.
    assert!(fake.received().is_empty());

    let info = DiscoveryManager::to_projector_info(&results[0]);
    assert_eq!(info.name, "Projector_127.0.0.1");
    assert!(info.requires_authentication);
    Ok(())
}

#[tokio::test]
async fn test_nothing_listening() -> Result<()> {
    let fake = FakeProjector::start().await;
    let settings = settings_for(&fake);
    drop(fake);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let discovery = DiscoveryManager::new(settings);
    let id = discovery
        .start_range_scan(LOCALHOST, LOCALHOST, Duration::from_secs(2))
        .await?;
    let results = discovery.wait_for_completion(&id).await.expect("known run");
    assert!(results.is_empty());
    assert_eq!(discovery.status(&id).map(|s| s.scanned_addresses), Some(1));
    Ok(())
}

/// 掃描結果加入群組並存成預設組態
#[tokio::test]
async fn test_results_become_group_and_presets() -> Result<()> {
    let fake = FakeProjector::start().await;
    let discovery = DiscoveryManager::new(settings_for(&fake));
    let id = discovery
        .start_range_scan(LOCALHOST, LOCALHOST, Duration::from_secs(5))
        .await?;
    let results = discovery.wait_for_completion(&id).await.unwrap_or_default();

    let manager: ProjectorManager<Projector> = ProjectorManager::new(Default::default());
    assert_eq!(discovery.save_results_as_group(&manager, &id, "Found"), 1);
    assert!(manager.group_exists("Found"));
    assert_eq!(manager.projectors_in_group("Found").len(), 1);
    assert_eq!(discovery.save_results_as_group(&manager, "unknown", "Other"), 0);
    assert!(!manager.group_exists("Other"));

    let temp_dir = TempDir::new()?;
    let mut presets = PresetManager::new(LocalStorage::new(temp_dir.path()));
    DiscoveryManager::save_result_as_preset(&mut presets, &results[0], "found-1")?;
    let info = presets.load_preset("found-1").expect("preset saved");
    assert_eq!(info.name, "Fake Projector");
    assert_eq!(info.port, fake.port());
    Ok(())
}

#[tokio::test]
async fn test_invalid_ranges_are_rejected() {
    let discovery = DiscoveryManager::default();
    let unspecified = Ipv4Addr::UNSPECIFIED;

    assert!(matches!(
        discovery
            .start_range_scan(unspecified, LOCALHOST, Duration::from_secs(1))
            .await,
        Err(PjlinkError::DiscoveryError { .. })
    ));
    assert_err!(
        discovery
            .start_range_scan(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1), Duration::from_secs(1))
            .await
    );
    assert_err!(
        discovery
            .start_subnet_scan(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 255, 0), Duration::from_secs(1))
            .await
    );
    assert!(discovery.all_statuses().is_empty());
}

#[tokio::test]
async fn test_cancel_marks_run_unsuccessful() -> Result<()> {
    let discovery = DiscoveryManager::new(DiscoverySettings {
        per_address_wait: Duration::from_millis(500),
        probe_timeout: Duration::from_millis(200),
        ..Default::default()
    });
    let mut events = discovery.subscribe();

    let id = discovery
        .start_range_scan(
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(127, 0, 0, 100),
            Duration::from_secs(60),
        )
        .await?;
    assert!(discovery.cancel(&id));
    assert!(discovery.cancel(&id));
    assert!(!discovery.cancel("unknown"));

    let status = discovery.status(&id).expect("status is kept");
    assert!(status.is_complete);
    assert!(status.was_cancelled);

    let mut outcomes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DiscoveryEvent::Completed { success, .. } = event {
            outcomes.push(success);
        }
    }
    assert_eq!(outcomes, vec![false]);
    Ok(())
}
