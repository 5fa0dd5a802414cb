use clap::Parser;
use outpost::{
    actors::correlator::CorrelationHandle,
    config::{CorrelationConfig, read_config_file},
    correlation::event::{CorrelatedEvent, Signal},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("outpost", LevelFilter::DEBUG),
        ("correlator", LevelFilter::TRACE),
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?.correlation.unwrap_or_default(),
        None => CorrelationConfig::default(),
    };
    debug!("correlating with {config:?}");

    let (event_tx, event_rx) = broadcast::channel(1024);
    let handle = CorrelationHandle::spawn(config, event_tx);

    let writer = tokio::spawn(write_events(event_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Signal>(&line) {
            Ok(signal) => handle.submit(signal).await?,
            Err(e) => warn!("skipping malformed signal: {e}"),
        }
    }

    info!(
        "input closed with {} facts in memory",
        handle.memory_size().await?
    );
    handle.shutdown().await?;

    if let Err(e) = writer.await {
        error!("{e}");
    }

    Ok(())
}

/// Write every correlated event as one JSON line to stdout
async fn write_events(mut event_rx: broadcast::Receiver<CorrelatedEvent>) {
    let mut stdout = tokio::io::stdout();

    loop {
        let event = match event_rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event writer lagged, skipped {skipped} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("unable to serialize event: {e}");
                continue;
            }
        };

        if let Err(e) = stdout.write_all(format!("{line}\n").as_bytes()).await {
            error!("unable to write event: {e}");
            break;
        }
        let _ = stdout.flush().await;
    }
}
