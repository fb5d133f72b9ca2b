//! Best-effort status reporting to the control plane.
//!
//! [`StatusReporter`] never blocks and never fails its caller: updates go into a
//! bounded queue drained by a single background task, which preserves their
//! order and swallows every delivery error. The terminal update is handed over
//! through [`StatusReporter::finish`], which consumes the reporter.

use crate::config::StatusEndpointConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::status::StatusUpdate;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue capacity between the job and the delivery task.
pub const STATUS_QUEUE_CAPACITY: usize = 64;

/// Destination for status updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, update: &StatusUpdate) -> HarnessResult<()>;
}

/// Posts updates to `{endpoint}/internal/jobs/{job_id}/status`.
#[derive(Debug, Clone)]
pub struct HttpStatusSink {
    url: String,
    token: Option<String>,
    client: Client,
}

impl HttpStatusSink {
    /// Fails only when the HTTP client cannot be initialized.
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> HarnessResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, token, client })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> HarnessResult<()> {
        let mut request = self.client.post(&self.url).json(update);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::StatusDelivery(format!("{} returned HTTP {}", self.url, status)));
        }
        Ok(())
    }
}

/// Used when no control plane is configured; updates only reach the local log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

#[async_trait]
impl StatusSink for ConsoleSink {
    async fn deliver(&self, _update: &StatusUpdate) -> HarnessResult<()> {
        Ok(())
    }
}

/// HTTP sink when both endpoint and job id are configured, console otherwise.
///
/// A client that cannot be built also falls back to the console, since status
/// reporting must never stop the job.
#[must_use]
pub fn sink_for(config: &StatusEndpointConfig) -> Arc<dyn StatusSink> {
    match config.status_url() {
        Some(url) => {
            if config.token.is_none() {
                warn!(url = %url, "API_TOKEN not set, status updates will be sent unauthenticated");
            }
            match HttpStatusSink::new(url, config.token.clone(), config.timeout) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    warn!(error = %e, "Failed to build HTTP client, status updates go to the log only");
                    Arc::new(ConsoleSink)
                }
            }
        }
        None => {
            debug!("No control plane configured, status updates go to the log only");
            Arc::new(ConsoleSink)
        }
    }
}

/// Fire-and-forget handle for reporting job status.
pub struct StatusReporter {
    tx: mpsc::Sender<StatusUpdate>,
    worker: JoinHandle<()>,
    last_progress: Arc<AtomicU8>,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").field("last_progress", &self.last_progress()).finish_non_exhaustive()
    }
}

impl StatusReporter {
    /// Starts the delivery task. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(sink: Arc<dyn StatusSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatusUpdate>(STATUS_QUEUE_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                info!(
                    status = %update.state,
                    progress = update.progress,
                    detail = %update.message,
                    "Status update"
                );
                if let Err(e) = sink.deliver(&update).await {
                    warn!(error = %e, status = %update.state, "Failed to report status");
                }
            }
        });

        Self { tx, worker, last_progress: Arc::new(AtomicU8::new(0)) }
    }

    /// Queues a RUNNING update without waiting.
    ///
    /// Terminal updates are refused here; they go through [`Self::finish`].
    pub fn report(&self, update: StatusUpdate) {
        if update.is_terminal() {
            warn!(status = %update.state, "Terminal status must be sent through finish(), ignoring");
            return;
        }

        self.last_progress.store(update.progress, Ordering::SeqCst);
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(progress = dropped.progress, "Status queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Status queue closed");
            }
        }
    }

    /// Progress of the most recent RUNNING update handed to [`Self::report`].
    #[must_use]
    pub fn last_progress(&self) -> u8 {
        self.last_progress.load(Ordering::SeqCst)
    }

    /// Sends the single terminal update and waits until everything queued is delivered.
    pub async fn finish(self, terminal: StatusUpdate) {
        let Self { tx, worker, .. } = self;
        if tx.send(terminal).await.is_err() {
            warn!("Status worker stopped before the terminal update was queued");
        }
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Status worker ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::status::JobState;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<StatusUpdate>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn deliver(&self, update: &StatusUpdate) -> HarnessResult<()> {
            self.updates.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        async fn deliver(&self, _update: &StatusUpdate) -> HarnessResult<()> {
            Err(HarnessError::StatusDelivery("control plane down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_reporter_preserves_order_and_finishes_once() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = StatusReporter::spawn(sink.clone());

        reporter.report(StatusUpdate::running(5, "Checking model weights"));
        reporter.report(StatusUpdate::running(40, "Initializing diffusion process"));
        reporter.report(StatusUpdate::running(49, "Diffusion step 10"));
        assert_eq!(reporter.last_progress(), 49);
        reporter.finish(StatusUpdate::succeeded("Generated 1 designs")).await;

        let updates = sink.updates.lock().unwrap();
        let progress: Vec<u8> = updates.iter().map(|u| u.progress).collect();
        assert_eq!(progress, vec![5, 40, 49, 100]);
        assert_eq!(updates.iter().filter(|u| u.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_report_rejects_terminal_updates() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = StatusReporter::spawn(sink.clone());

        reporter.report(StatusUpdate::failed(10, "not here"));
        reporter.finish(StatusUpdate::failed(10, "here")).await;

        let updates = sink.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].message, "here");
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let reporter = StatusReporter::spawn(Arc::new(FailingSink));
        reporter.report(StatusUpdate::running(20, "Downloading inputs"));
        reporter.finish(StatusUpdate::failed(20, "boom")).await;
    }

    #[tokio::test]
    async fn test_http_sink_posts_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/jobs/job-1/status")
            .match_header("authorization", "Bearer test-token")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "status": "RUNNING",
                "progress": 49,
                "message": "Diffusion step 10"
            })))
            .with_status(200)
            .create_async()
            .await;

        let config = StatusEndpointConfig {
            endpoint: Some(server.url()),
            token: Some("test-token".to_string()),
            job_id: Some(JobId("job-1".to_string())),
            ..Default::default()
        };
        let sink = sink_for(&config);
        sink.deliver(&StatusUpdate::running(49, "Diffusion step 10")).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_non_success_is_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/internal/jobs/job-1/status").with_status(503).create_async().await;

        let sink = HttpStatusSink::new(
            format!("{}/internal/jobs/job-1/status", server.url()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = sink.deliver(&StatusUpdate::failed(0, "x")).await.unwrap_err();
        assert!(matches!(err, HarnessError::StatusDelivery(ref m) if m.contains("503")));

        mock.assert_async().await;
    }

    #[test]
    fn test_http_sink_builds_client_with_timeout() {
        let sink = HttpStatusSink::new(
            "http://cp/internal/jobs/job-1/status".to_string(),
            Some("t".to_string()),
            Duration::from_secs(3),
        )
        .unwrap();
        assert_eq!(sink.url(), "http://cp/internal/jobs/job-1/status");
    }

    #[tokio::test]
    async fn test_reporter_survives_unreachable_endpoint() {
        let sink = Arc::new(HttpStatusSink::new(
            "http://127.0.0.1:9/internal/jobs/job-1/status".to_string(),
            None,
            Duration::from_secs(1),
        )
        .unwrap());
        let reporter = StatusReporter::spawn(sink);
        reporter.report(StatusUpdate::running(30, "Running RFdiffusion"));
        reporter.finish(StatusUpdate { state: JobState::Succeeded, progress: 100, message: "done".to_string() }).await;
    }
}
