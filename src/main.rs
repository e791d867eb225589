use clap::Parser;
use pjlink_ctl::config::options::duration_from_secs;
use pjlink_ctl::config::{CliCommand, DiscoverMode, PresetAction};
use pjlink_ctl::core::discovery::DiscoveryManager;
use pjlink_ctl::utils::error::ErrorSeverity;
use pjlink_ctl::utils::validation::{validate_ip_address, Validate};
use pjlink_ctl::utils::logger;
use pjlink_ctl::{
    CliConfig, Command, DiscoverySettings, InputSource, LocalStorage, PjlinkError, PresetManager,
    Projector, ProjectorInfo, Result,
};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose);

    tracing::info!("Starting pjlink CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if let Err(e) = run(&config).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(config: &CliConfig) -> Result<()> {
    let mut presets = PresetManager::new(LocalStorage::new(&config.presets_dir));
    presets.load().await?;

    match &config.command {
        CliCommand::Discover { save, mode } => {
            return discover(config, mode, *save, &mut presets).await;
        }
        CliCommand::Preset { action } => {
            return manage_presets(config, action, &mut presets).await;
        }
        _ => {}
    }

    let info = resolve_projector(config, &presets)?;
    let projector = Projector::new(info, config.client_options());

    // 報告模式：連線失敗也要輸出診斷內容
    if matches!(config.command, CliCommand::Report) {
        if let Err(e) = projector.connect().await {
            tracing::warn!("⚠️ Connect failed: {}", e);
        }
        println!("{}", projector.generate_diagnostic_report());
        projector.disconnect().await;
        return Ok(());
    }

    projector.connect().await?;
    tracing::info!("🔌 Connected to {}", projector.client().projector_id());

    let outcome = execute(&projector, &config.command).await;
    projector.disconnect().await;
    outcome
}

fn resolve_projector(config: &CliConfig, presets: &PresetManager<LocalStorage>) -> Result<ProjectorInfo> {
    match &config.preset {
        Some(name) => presets
            .load_preset(name)
            .ok_or_else(|| PjlinkError::PresetError {
                message: format!("preset '{}' not found in {}", name, config.presets_dir),
            }),
        None => config.projector_info(),
    }
}

async fn execute(projector: &Projector, command: &CliCommand) -> Result<()> {
    match command {
        CliCommand::Status => {
            let info = projector.client().info();
            println!("📽️  {} ({})", info.display_name(), info.projector_id());
            if !info.manufacturer_name.is_empty() || !info.product_name.is_empty() {
                println!("   Model:  {} {}", info.manufacturer_name, info.product_name);
            }
            println!("   Class:  {}", info.device_class);
            println!("   Power:  {}", info.power_status);
            println!("   Input:  {}", info.current_input);
            println!("   State:  {}", projector.state());
        }
        CliCommand::PowerOn => {
            projector.power_on().await?;
            println!("✅ Power on sent ({})", projector.client().info().power_status);
        }
        CliCommand::PowerOff => {
            projector.power_off().await?;
            println!("✅ Power off sent ({})", projector.client().info().power_status);
        }
        CliCommand::Input { source, channel } => {
            let parsed = InputSource::parse_name(source).ok_or_else(|| PjlinkError::InvalidConfigValueError {
                field: "source".to_string(),
                value: source.clone(),
                reason: "Expected rgb, video, digital, storage or network".to_string(),
            })?;
            projector.switch_input_channel(parsed, *channel).await?;
            println!("✅ Input switched to {} {}", parsed, channel);
        }
        CliCommand::Mute { target, off } => {
            projector.set_av_mute((*target).into(), !*off).await?;
            let state = projector.av_mute_state().await?;
            println!("✅ AV mute: {:?} {}", state.target, if state.muted { "on" } else { "off" });
        }
        CliCommand::Errors => {
            let status = projector.error_status().await?;
            for (name, level) in status.fields() {
                let label = match level {
                    0 => "OK",
                    1 => "Warning",
                    _ => "Error",
                };
                println!("   {:<12} {}", name, label);
            }
            if status.has_error() {
                println!("❌ Projector reports errors");
            } else if status.has_warning() {
                println!("⚠️ Projector reports warnings");
            }
        }
        CliCommand::Lamps => {
            for (index, lamp) in projector.lamp_status().await?.iter().enumerate() {
                println!(
                    "   Lamp {}: {} hours, {}",
                    index + 1,
                    lamp.hours,
                    if lamp.is_on { "on" } else { "off" }
                );
            }
        }
        CliCommand::Inputs => {
            for (source, channel) in projector.available_inputs().await? {
                println!("   {} {}", source, channel);
            }
        }
        CliCommand::Raw { command, parameter } => {
            let parsed = Command::from_code(&command.to_uppercase()).ok_or_else(|| {
                PjlinkError::InvalidConfigValueError {
                    field: "command".to_string(),
                    value: command.clone(),
                    reason: "Unknown PJLink command".to_string(),
                }
            })?;
            let reply = projector
                .send_raw(parsed, parameter.as_deref().unwrap_or_default())
                .await?;
            println!("{}={}", parsed, if reply.is_empty() { "OK" } else { reply.as_str() });
        }
        CliCommand::Report | CliCommand::Discover { .. } | CliCommand::Preset { .. } => {}
    }
    Ok(())
}

async fn discover(
    config: &CliConfig,
    mode: &DiscoverMode,
    save: bool,
    presets: &mut PresetManager<LocalStorage>,
) -> Result<()> {
    let manager = DiscoveryManager::new(DiscoverySettings {
        port: config.port,
        ..Default::default()
    });

    let discovery_id = match mode {
        DiscoverMode::Broadcast { timeout } => {
            tracing::info!("📡 Broadcast discovery for {:.1}s", timeout);
            manager.start_broadcast(duration_from_secs(*timeout)).await?
        }
        DiscoverMode::Range { start, end, timeout } => {
            let start = validate_ip_address("start", start)?;
            let end = validate_ip_address("end", end)?;
            tracing::info!("🔍 Scanning {} - {}", start, end);
            manager
                .start_range_scan(start, end, duration_from_secs(*timeout))
                .await?
        }
        DiscoverMode::Subnet { subnet, mask, timeout } => {
            let subnet = validate_ip_address("subnet", subnet)?;
            let mask = validate_ip_address("mask", mask)?;
            tracing::info!("🔍 Scanning subnet {}/{}", subnet, mask);
            manager
                .start_subnet_scan(subnet, mask, duration_from_secs(*timeout))
                .await?
        }
    };

    let results = manager
        .wait_for_completion(&discovery_id)
        .await
        .unwrap_or_default();

    println!("✅ Found {} projector(s)", results.len());
    for result in &results {
        println!(
            "   {}:{}  {}  {}  {}{}",
            result.ip_address,
            result.port,
            result.device_class,
            if result.name.is_empty() { "-" } else { result.name.as_str() },
            if result.model_name.is_empty() { "-" } else { result.model_name.as_str() },
            if result.requires_authentication { "  🔒" } else { "" }
        );
    }

    if save && !results.is_empty() {
        for result in &results {
            let info = DiscoveryManager::to_projector_info(result);
            let name = info.name.clone();
            presets.save_preset(&name, info)?;
        }
        presets.save().await?;
        println!("💾 Saved {} preset(s) to {}", results.len(), config.presets_dir);
    }
    Ok(())
}

async fn manage_presets(
    config: &CliConfig,
    action: &PresetAction,
    presets: &mut PresetManager<LocalStorage>,
) -> Result<()> {
    match action {
        PresetAction::Save { name } => {
            let info = config.projector_info()?;
            presets.save_preset(name, info)?;
            presets.save().await?;
            println!("💾 Saved preset {}", name);
        }
        PresetAction::List => {
            for preset in presets.all_presets() {
                println!(
                    "   {:<20} {}",
                    preset.preset_name,
                    preset.projector_info.projector_id()
                );
            }
            for preset in presets.all_group_presets() {
                println!(
                    "   {:<20} group {} ({} projectors)",
                    preset.preset_name,
                    preset.group_name,
                    preset.projector_count()
                );
            }
        }
        PresetAction::Show { name } => {
            let info = presets.load_preset(name).ok_or_else(|| PjlinkError::PresetError {
                message: format!("preset '{}' not found", name),
            })?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        PresetAction::Delete { name } => {
            if !presets.delete_preset(name) {
                return Err(PjlinkError::PresetError {
                    message: format!("preset '{}' not found", name),
                });
            }
            presets.save().await?;
            println!("🗑️ Deleted preset {}", name);
        }
    }
    Ok(())
}
