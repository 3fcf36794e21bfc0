use anyhow::Result;
use clap::Parser;
use rsmon::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[derive(Parser)]
#[command(name = "rsmon", about = "Remote server monitor over SSH", version)]
struct Args {
    /// Config file. Defaults to $CONFIG_FILE, then ./config.toml
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Collect one round from every host, print it and exit
    #[arg(long)]
    once: bool,

    /// Print snapshots as JSON lines
    #[arg(long)]
    json: bool,
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let app_config = match &args.config {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = if args.json {
        render::OutputFormat::Json
    } else {
        render::OutputFormat::Text
    };
    let connector = Arc::new(transport::SshConnector::new()?);
    let monitor = Arc::new(monitor::Monitor::build(&app_config, connector));
    tracing::info!(
        hosts = monitor.hosts().len(),
        collectors = ?monitor.registry().names(),
        "monitor configured"
    );

    if args.once {
        let snapshot = monitor.run_once().await;
        print_snapshot(&snapshot, format)?;
        return Ok(());
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let monitor_handle = monitor::spawn(monitor::MonitorDeps {
        monitor,
        tx,
        shutdown_rx,
    });

    tokio::select! {
        _ = async {
            while let Some(snapshot) = rx.recv().await {
                if let Err(e) = print_snapshot(&snapshot, format) {
                    tracing::error!(error = %e, operation = "render", "failed to print snapshot");
                    break;
                }
            }
        } => {}
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(());
    drop(rx);
    if let Err(e) = monitor_handle.await {
        tracing::warn!(error = %e, "monitor task ended abnormally");
    }
    Ok(())
}

fn print_snapshot(snapshot: &render::Snapshot, format: render::OutputFormat) -> Result<()> {
    let rendered = render::render(snapshot, format)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered.trim_end())?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
