pub mod utils;

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::cache::LocalCache;
use common::cursor::CursorStore;
use common::directory::RemoteDirectory;
use common::jobs::{run_worker, JobReceiver};
use common::provision::KeyProvisioningService;
use common::secret_store::SecretStore;

use crate::config::ServiceConfig;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for stopping the background worker
#[derive(Debug)]
pub struct ShutdownHandle {
    worker: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the worker without waiting for it
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            tracing::debug!("job worker already stopped, nothing to signal");
        }
    }

    /// Signal the worker and wait for its in-flight job to finish
    pub async fn wait(self) {
        self.shutdown();
        match timeout(FINAL_SHUTDOWN_TIMEOUT, self.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("job worker exited abnormally: {}", e),
            Err(_) => tracing::error!(
                "job worker failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            ),
        }
    }
}

/// Spawn the background job worker
pub fn spawn_worker<D, C, K, S>(
    provisioner: KeyProvisioningService<D, C, K, S>,
    receiver: JobReceiver,
) -> ShutdownHandle
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = tokio::spawn(run_worker(provisioner, receiver, shutdown_rx));
    ShutdownHandle {
        worker,
        shutdown_tx,
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    service_config: &ServiceConfig,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Stdout layer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    // File layer (if log_dir is set)
    let result = if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "courier.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(service_config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry().with(stdout_layer).try_init()
    };

    // the host application may already own the global subscriber
    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
        return guards;
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}
