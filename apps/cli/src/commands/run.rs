//! Run command implementation.

use rfd_harness::{
    fail_before_start, sink_for, Collaborators, HarnessConfig, HarnessError, JobDriver, ProcessEnv, StatusReporter,
};
use tracing::{debug, info, warn};

/// Execute the job described by the process environment.
///
/// Returns the process exit code: 0 on success, the workload's own code when
/// it exited non-zero, 128 + signal number when interrupted, 1 otherwise.
pub async fn execute() -> i32 {
    let shutdown = ShutdownSignals::install();
    let (status, config) = HarnessConfig::load(&ProcessEnv);
    let reporter = StatusReporter::spawn(sink_for(&status));

    let report = match config {
        Ok(config) => {
            debug!(config = ?config, "Resolved configuration");
            let deps = Collaborators::production(&config);
            JobDriver::new(config, deps).run_until(reporter, shutdown.recv()).await
        }
        Err(e) => fail_before_start(e, reporter).await,
    };

    if let Ok(outcome) = &report.outcome {
        if let Ok(summary) = serde_json::to_string(outcome) {
            info!(outcome = %summary, "Job summary");
        }
    }

    report.exit_code()
}

/// SIGTERM and SIGINT handlers, registered before the job starts.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    interrupt: Option<tokio::signal::unix::Signal>,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let register = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| warn!(signal = name, error = %e, "Failed to install signal handler")).ok()
        };
        Self {
            terminate: register(SignalKind::terminate(), "SIGTERM"),
            interrupt: register(SignalKind::interrupt(), "SIGINT"),
        }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    /// Resolves with the interruption error once a signal arrives.
    #[cfg(unix)]
    async fn recv(mut self) -> HarnessError {
        async fn next(signal: Option<&mut tokio::signal::unix::Signal>) {
            if let Some(signal) = signal {
                if signal.recv().await.is_some() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }

        let (signal, exit_code) = tokio::select! {
            () = next(self.terminate.as_mut()) => ("SIGTERM", 143),
            () = next(self.interrupt.as_mut()) => ("SIGINT", 130),
        };
        warn!(signal, "Received shutdown signal");
        HarnessError::Interrupted { signal: signal.to_string(), exit_code }
    }

    #[cfg(not(unix))]
    async fn recv(self) -> HarnessError {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        HarnessError::Interrupted { signal: "Ctrl-C".to_string(), exit_code: 130 }
    }
}
