// corrald - the supervisor daemon

use anyhow::Context;
use clap::Parser;
use corral::config::{CorralConfig, DEFAULT_CONFIG_FILE};
use corral::daemon::{daemonize, Daemon, PidFile};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Daemon log file name inside the log directory
const DAEMON_LOG: &str = "corrald.log";

#[derive(Parser)]
#[command(name = "corrald")]
#[command(version, about = "Corral supervisor daemon", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CORRAL_CONFIG")]
    config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(long)]
    daemonize: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Forking is only safe while the process is still single-threaded
    if args.daemonize {
        daemonize().context("Failed to daemonize")?;
    }

    dotenvy::dotenv().ok();

    let config = match &args.config {
        Some(path) => CorralConfig::load(path, true),
        None => CorralConfig::load(Path::new(DEFAULT_CONFIG_FILE), false),
    }
    .context("Failed to load configuration")?;

    let _log_guard = init_logging(&config.logs.dir);

    let _pid_guard = PidFile::with_path(config.daemon_pid_path())
        .acquire()
        .context("Failed to acquire daemon PID file")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        let daemon = Daemon::new(config).await?;
        daemon.bootstrap().await?;
        daemon.run().await
    })?;

    Ok(())
}

/// Log to stderr and to a daily file in the log directory.
///
/// File logging is skipped when the directory is not writable, since the
/// rolling appender panics if it cannot create its first file.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corral=info"));

    let marker = log_dir.join(".corrald_write_test");
    let writable = std::fs::create_dir_all(log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&marker)
    });

    let file_layer = match writable {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            let appender = tracing_appender::rolling::daily(log_dir, DAEMON_LOG);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Some((
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
                guard,
            ))
        }
        Err(e) => {
            eprintln!(
                "Warning: cannot write to {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            None
        }
    };

    let (file_layer, guard) = match file_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
