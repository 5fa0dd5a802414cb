use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use outpost::{
    ScanReport,
    config::{PollerConfig, read_config_file},
    poller::{
        PollerCoordinator,
        backend::HttpPollerBackend,
        events::PropertyChange,
        service::HttpPollService,
        settings::FilePollerSettings,
        state::CoordinatorState,
        time::OffsetTimeAdjustment,
    },
    util::{get_backend_url, get_location, get_settings_path},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Location to register at if this poller has no identity yet
    #[arg(long)]
    location: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("outpost", LevelFilter::DEBUG),
        ("poller", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn poller_config(args: &Args) -> anyhow::Result<PollerConfig> {
    let mut config = match &args.file {
        Some(file) => read_config_file(file)?.poller,
        None => None,
    };

    if let Some(backend_url) = get_backend_url() {
        match config.as_mut() {
            Some(config) => config.backend_url = backend_url,
            None => config = Some(PollerConfig::new(backend_url)),
        }
    }

    let Some(mut config) = config else {
        bail!("no poller configuration: pass a config file or set OUTPOST_BACKEND_URL");
    };

    if let Some(location) = args.location.clone().or_else(get_location) {
        config.location = Some(location);
    }
    if let Some(path) = get_settings_path() {
        config.settings_path = Some(path);
    }

    Ok(config)
}

fn settings_path(config: &PollerConfig) -> anyhow::Result<PathBuf> {
    config
        .settings_path
        .clone()
        .or_else(FilePollerSettings::default_path)
        .context("no settings path configured and no user config directory available")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = poller_config(&args)?;
    let settings = FilePollerSettings::new(settings_path(&config)?);
    debug!("using settings file {}", settings.path().display());

    let time_adjustment = Arc::new(OffsetTimeAdjustment::new());
    let poll_service = HttpPollService::new(
        time_adjustment.clone(),
        Duration::from_secs(config.check_timeout_secs),
    )?;
    let backend = HttpPollerBackend::new(
        &config.backend_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let coordinator = PollerCoordinator::builder()
        .backend(Arc::new(backend))
        .poll_service(Arc::new(poll_service))
        .settings(Arc::new(settings))
        .time_adjustment(time_adjustment)
        .metadata(config.metadata.clone())
        .build();

    let report: Arc<Mutex<Option<ScanReport>>> = Arc::default();
    let report_slot = report.clone();
    coordinator.add_property_change_listener(move |change: &PropertyChange| {
        match change {
            PropertyChange::Started { old, new } | PropertyChange::Registered { old, new } => {
                debug!("{}: {old} -> {new}", change.name());
            }
            PropertyChange::PercentageComplete(progress) => {
                debug!("{}: {:.0}%", change.name(), progress * 100.0);
            }
            PropertyChange::ExitNecessary(scan_report) => {
                debug!("{}: {} results", change.name(), scan_report.len());
                *report_slot.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(scan_report.clone());
            }
        }
    });

    coordinator.initialize().await?;

    if matches!(coordinator.state(), CoordinatorState::Registering) {
        let Some(location) = config.location.as_deref() else {
            bail!("poller is not registered and no location is configured");
        };
        info!("registering at {location}");
        coordinator.register(location).await?;
    }

    let report = report.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(report) = report {
        println!("{}", serde_json::to_string(&report)?);
    }

    if let Some(err) = coordinator.fatal_error() {
        error!("poller stopped: {err}");
        bail!(err);
    }

    Ok(())
}
