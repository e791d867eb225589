use clap::{Parser, Subcommand};
use pjlink_ctl::config::options::duration_from_secs;
use pjlink_ctl::config::toml_config::TomlConfig;
use pjlink_ctl::core::ProjectorControl;
use pjlink_ctl::domain::model::GroupCommandResult;
use pjlink_ctl::utils::error::ErrorSeverity;
use pjlink_ctl::utils::validation::{validate_ip_address, validate_required_field, Validate};
use pjlink_ctl::utils::logger;
use pjlink_ctl::{
    DiscoveryManager, InputSource, LocalStorage, ManagerEvent, PjlinkError, PresetManager,
    Projector, ProjectorManager, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "pjlink-fleet")]
#[command(about = "Control a fleet of PJLink projectors described in a TOML file")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "pjlink-fleet.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json_logs: bool,

    /// Restrict the command to one group
    #[arg(short, long)]
    group: Option<String>,

    /// Dry run - show what would be done without contacting projectors
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: FleetCommand,
}

#[derive(Subcommand, Debug)]
enum FleetCommand {
    /// List configured groups and projectors
    List,
    /// Connect and report each projector's status
    Status,
    PowerOn,
    PowerOff,
    Input { source: String },
    /// Find projectors and print them as [[projectors]] entries
    Discover {
        /// Scan start address; without it a broadcast search is used
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Seconds; defaults to [discovery] timeout_seconds
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Save the --group layout as a group preset
    SavePreset {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Restore a group preset
    LoadPreset { name: String },
    /// Keep polling and print status changes until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting pjlink-fleet");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    // 載入 TOML 配置
    let config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");

    let manager = Arc::new(build_manager(&config));

    if args.dry_run {
        display_config_summary(&config, &manager, &args);
        perform_dry_run(&manager, &args);
        return Ok(());
    }

    match run(&config, &manager, &args).await {
        Ok(failed) => {
            manager.disconnect_all().await;
            if failed > 0 {
                eprintln!("⚠️ {} projector(s) did not complete the command", failed);
                std::process::exit(2);
            }
        }
        Err(e) => {
            manager.disconnect_all().await;
            tracing::error!(
                "❌ Fleet command failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

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
    }

    Ok(())
}

fn build_manager(config: &TomlConfig) -> ProjectorManager<Projector> {
    let manager: ProjectorManager<Projector> = ProjectorManager::new(config.client_options());
    if let Some(wait) = config.group_command_timeout() {
        manager.set_command_timeout(wait);
    }

    for group in config.group_definitions() {
        manager.create_group_with_info(&group.name, &group.description, group.color);
    }
    for entry in &config.projectors {
        let projector = manager.add_projector(entry.to_info(), None);
        let id = projector.projector_id();
        for group in &entry.groups {
            manager.add_to_group(group, &id);
        }
    }
    manager
}

/// Returns how many projectors failed or did not answer.
async fn run(config: &TomlConfig, manager: &Arc<ProjectorManager<Projector>>, args: &Args) -> Result<usize> {
    let group = args.group.as_deref();

    match &args.command {
        FleetCommand::List => {
            list(manager);
            Ok(0)
        }
        FleetCommand::Status => {
            let connected = connect(manager, group).await?;
            let statuses = match group {
                Some(name) => manager.group_statuses(name),
                None => manager.all_statuses(),
            };
            for status in &statuses {
                println!(
                    "{} {:<24} {:<21} {:<12} {:<10} {}",
                    if status.is_healthy { "✅" } else { "❌" },
                    status.projector_name,
                    status.projector_id,
                    status.current.power_status.to_string(),
                    status.current.input_source.to_string(),
                    status.current.error_message
                );
            }
            Ok(connected.failure_count + connected.no_response_count)
        }
        FleetCommand::PowerOn => {
            connect(manager, group).await?;
            let result = match group {
                Some(name) => manager.power_on_group(name).await?,
                None => manager.power_on_all().await,
            };
            Ok(report(&result))
        }
        FleetCommand::PowerOff => {
            connect(manager, group).await?;
            let result = match group {
                Some(name) => manager.power_off_group(name).await?,
                None => manager.power_off_all().await,
            };
            Ok(report(&result))
        }
        FleetCommand::Input { source } => {
            let source = InputSource::parse_name(source).ok_or_else(|| PjlinkError::InvalidConfigValueError {
                field: "source".to_string(),
                value: source.clone(),
                reason: "Expected rgb, video, digital, storage or network".to_string(),
            })?;
            connect(manager, group).await?;
            let result = match group {
                Some(name) => manager.switch_input_group(name, source).await?,
                None => manager.switch_input_all(source).await,
            };
            Ok(report(&result))
        }
        FleetCommand::Discover { start, end, timeout } => {
            discover(config, manager, group, start.as_deref(), end.as_deref(), *timeout).await?;
            Ok(0)
        }
        FleetCommand::SavePreset { name, description } => {
            let group = *validate_required_field("group", &group)?;
            connect(manager, Some(group)).await?;
            let mut presets = load_presets(config).await?;
            manager.save_group_preset(&mut presets, name, group, description).await?;
            println!("💾 Saved group preset {} for {}", name, group);
            Ok(0)
        }
        FleetCommand::LoadPreset { name } => {
            let presets = load_presets(config).await?;
            let count = manager.load_group_preset(&presets, name).await?;
            println!("📂 Loaded group preset {} ({} projectors)", name, count);
            Ok(manager.unhealthy_statuses().len())
        }
        FleetCommand::Watch => {
            connect(manager, group).await?;
            watch(config, manager, group).await;
            Ok(0)
        }
    }
}

async fn watch(config: &TomlConfig, manager: &Arc<ProjectorManager<Projector>>, group: Option<&str>) {
    let interval = config.status_interval().unwrap_or(DEFAULT_WATCH_INTERVAL);
    let mut events = manager.subscribe();
    let updates = manager.spawn_status_updates(interval);
    tracing::info!("👀 Watching projector status every {:.1}s", interval.as_secs_f64());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ManagerEvent::StatusChanged(status)) => {
                    if group.is_some_and(|g| !manager.is_in_group(&status.projector_id, g)) {
                        continue;
                    }
                    println!(
                        "{} {} {:<21} {:<12} {}",
                        chrono::Local::now().format("%H:%M:%S"),
                        if status.is_healthy { "✅" } else { "❌" },
                        status.projector_id,
                        status.current.power_status.to_string(),
                        status.current.input_source
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} status events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    updates.abort();
    println!("👋 Stopped watching");
}

async fn load_presets(config: &TomlConfig) -> Result<PresetManager<LocalStorage>> {
    let mut presets = PresetManager::new(LocalStorage::new(config.presets_path()));
    presets.load().await?;
    Ok(presets)
}

async fn connect(manager: &ProjectorManager<Projector>, group: Option<&str>) -> Result<GroupCommandResult> {
    let result = match group {
        Some(name) => manager.connect_group(name).await?,
        None => manager.connect_all().await,
    };
    tracing::info!(
        "🔌 Connected {}/{} projectors",
        result.success_count,
        result.total_projectors
    );
    Ok(result)
}

fn report(result: &GroupCommandResult) -> usize {
    println!(
        "📊 {} {} on {}: {} ok, {} failed, {} no response ({:.1}s)",
        result.command,
        result.parameter,
        result.group_name,
        result.success_count,
        result.failure_count,
        result.no_response_count,
        result.elapsed_seconds()
    );
    for (projector_id, outcome) in &result.results {
        if !outcome.success {
            println!("   ❌ {}: {}", projector_id, outcome.message);
        }
    }
    result.failure_count + result.no_response_count
}

fn list(manager: &ProjectorManager<Projector>) {
    println!("📋 Groups:");
    for group in manager.all_groups() {
        println!("  {} ({} projectors) {}", group.name, group.projector_count(), group.description);
    }
    println!("📽️ Projectors:");
    for projector in manager.all_projectors() {
        let info = projector.info();
        let groups: Vec<String> = manager
            .group_names()
            .into_iter()
            .filter(|g| manager.is_in_group(&info.projector_id(), g))
            .collect();
        println!(
            "  {:<24} {:<21} {}{}",
            info.name,
            info.projector_id(),
            info.device_class,
            if groups.is_empty() {
                String::new()
            } else {
                format!("  [{}]", groups.join(", "))
            }
        );
    }
}

async fn discover(
    config: &TomlConfig,
    manager: &ProjectorManager<Projector>,
    group: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    timeout: Option<f64>,
) -> Result<()> {
    let discovery = DiscoveryManager::new(config.discovery_settings());
    let wait = timeout
        .map(duration_from_secs)
        .unwrap_or_else(|| config.discovery_timeout());

    let discovery_id = match (start, end) {
        (Some(start), Some(end)) => {
            let start = validate_ip_address("start", start)?;
            let end = validate_ip_address("end", end)?;
            tracing::info!("🔍 Scanning {} - {}", start, end);
            discovery.start_range_scan(start, end, wait).await?
        }
        (None, None) => {
            tracing::info!("📡 Broadcast discovery for {:.1}s", wait.as_secs_f64());
            discovery.start_broadcast(wait).await?
        }
        _ => {
            return Err(PjlinkError::MissingConfigError {
                field: "start/end".to_string(),
            })
        }
    };

    let results = discovery
        .wait_for_completion(&discovery_id)
        .await
        .unwrap_or_default();
    println!("✅ Found {} projector(s)", results.len());

    if let Some(group) = group {
        let added = discovery.save_results_as_group(manager, &discovery_id, group);
        println!("📁 {} projector(s) assigned to group {}", added, group);
    }

    for result in &results {
        let info = DiscoveryManager::to_projector_info(result);
        println!();
        println!("[[projectors]]");
        println!("name = \"{}\"", info.name);
        println!("ip_address = \"{}\"", info.ip_address);
        println!("port = {}", info.port);
        println!("class = {}", info.device_class.wire_digit());
        if info.requires_authentication {
            println!("password = \"${{PJLINK_PASSWORD}}\"");
        }
        if let Some(group) = group {
            println!("groups = [\"{}\"]", group);
        }
    }
    Ok(())
}

fn display_config_summary(config: &TomlConfig, manager: &ProjectorManager<Projector>, args: &Args) {
    let options = config.client_options();
    println!("📋 Configuration Summary:");
    println!("  Projectors: {}", manager.projector_count());
    println!("  Groups: {}", manager.group_names().join(", "));
    println!("  Connect timeout: {:.1}s", options.connect_timeout.as_secs_f64());
    println!("  Command timeout: {:.1}s", options.command_timeout.as_secs_f64());
    println!("  Group command timeout: {:.1}s", manager.command_timeout().as_secs_f64());
    println!("  Auto reconnect: {}", options.auto_reconnect);
    println!("  Presets: {}", config.presets_path());

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

fn perform_dry_run(manager: &ProjectorManager<Projector>, args: &Args) {
    println!("🔍 Dry Run Analysis:");
    println!("  Command: {:?}", args.command);

    let targets = match args.group.as_deref() {
        Some(name) if !manager.group_exists(name) => {
            println!("  ⚠️ Group '{}' is not defined", name);
            Vec::new()
        }
        Some(name) => manager.projectors_in_group(name),
        None => manager.all_projectors(),
    };

    println!("  Targets: {}", targets.len());
    for projector in targets {
        let info = projector.info();
        println!(
            "    {} ({}){}",
            info.name,
            info.projector_id(),
            if info.requires_authentication { " 🔒" } else { "" }
        );
    }

    println!();
    println!("✅ Dry run analysis complete. No projector was contacted.");
}
