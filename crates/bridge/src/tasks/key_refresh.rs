//! Public-key refresh background task.
//!
//! Fetches the authorising API's JWKS on a periodic interval and exposes
//! the current set plus a readiness signal. Failure handling is two-tier:
//!
//! - While no key has ever been obtained ("cold"), a retryable failure
//!   (per-attempt timeout or 5xx) keeps retrying on a short backoff, and
//!   any other failure is delivered through the readiness signal and
//!   terminates the loop; the process cannot serve without a key.
//! - Once a key set is held ("warm"), retryable failures behave the same
//!   and every other failure is logged and swallowed; the previously
//!   acquired set stays in use and the next periodic tick retries.
//!
//! # Graceful Shutdown
//!
//! The worker owns a lifetime `CancellationToken`; `stop()` cancels it and
//! the loop exits at the next suspension point.

use crate::auth::KeySetProvider;
use crate::config::Config;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use reqwest::header::USER_AGENT;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

/// Path of the public-key endpoint under the API base URL.
pub const PUBLIC_KEY_PATH: &str = "/v1/bridge_authn_pubkey";

/// Backoff before kicking an immediate retry after a retryable failure.
const RETRY_BACKOFF: Duration = Duration::from_secs(3);

const FETCH_USER_AGENT: &str = concat!("basemachina-bridge/", env!("CARGO_PKG_VERSION"));

/// A single fetch attempt's failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("failed to send request to {url}: {message}")]
    Transport { url: String, message: String },

    #[error("failed to parse key set response: {0}")]
    Parse(String),
}

impl FetchError {
    /// Retryable failures: the per-attempt timeout elapsed, or the key
    /// source answered 5xx. Everything else is treated as fatal while
    /// cold.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Status(code) => (500..=599).contains(code),
            _ => false,
        }
    }
}

/// Error returned by [`KeyRefreshWorker::wait_ready`].
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("key refresh worker stopped before becoming ready")]
    Cancelled,

    #[error("failed to obtain initial key set: {0}")]
    Fatal(Arc<FetchError>),
}

/// Readiness of the worker: transitions exactly once away from `Pending`.
#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready,
    Failed(Arc<FetchError>),
}

/// Background worker that keeps the public-key set fresh.
pub struct KeyRefreshWorker {
    api_url: Url,
    interval: Duration,
    timeout: Duration,
    client: reqwest::Client,

    key_set: RwLock<Arc<JwkSet>>,

    ready_tx: watch::Sender<ReadyState>,
    ready_rx: watch::Receiver<ReadyState>,

    cancel: CancellationToken,
}

impl KeyRefreshWorker {
    /// Creates a worker from configuration. The loop does not run until
    /// [`start`](Self::start) is called.
    pub fn new(config: &Config) -> Self {
        Self::with_settings(
            config.api_url.clone(),
            config.fetch_interval,
            config.fetch_timeout,
        )
    }

    /// Creates a worker with explicit settings (used by tests).
    pub fn with_settings(api_url: Url, interval: Duration, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().build().unwrap_or_else(|e| {
            warn!(
                target: "bridge.task.key_refresh",
                error = %e,
                "failed to build HTTP client with custom config, using defaults"
            );
            reqwest::Client::new()
        });
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);

        Self {
            api_url,
            interval,
            timeout,
            client,
            key_set: RwLock::new(Arc::new(JwkSet { keys: Vec::new() })),
            ready_tx,
            ready_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the refresh loop. Called once at startup.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run().await;
            info!(target: "bridge.task.key_refresh", "finished running key refresh worker");
        })
    }

    /// Cancels the worker's lifetime; the loop exits at the next
    /// suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the first successful fetch, a fatal cold-fetch
    /// failure, `cancel` firing, or the worker's own lifetime ending,
    /// whichever comes first.
    ///
    /// Once this has returned `Ok` for any observer, all subsequent calls
    /// return `Ok` immediately.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let mut rx = self.ready_rx.clone();
        loop {
            match &*rx.borrow_and_update() {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(err) => return Err(WorkerError::Fatal(Arc::clone(err))),
                ReadyState::Pending => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
                _ = self.cancel.cancelled() => return Err(WorkerError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(WorkerError::Cancelled);
                    }
                }
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(&*self.ready_rx.borrow(), ReadyState::Ready)
    }

    async fn run(&self) {
        let mut controller = WorkController::new(self.interval);

        while controller.next(&self.cancel).await {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = self.fetch_key_set() => result,
            };
            match result {
                Ok(set) => {
                    *self.key_set.write() = Arc::new(set);
                    if !self.is_ready() {
                        let _ = self.ready_tx.send(ReadyState::Ready);
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        target: "bridge.task.key_refresh",
                        error = %err,
                        retry_after = ?RETRY_BACKOFF,
                        "retryable failure while fetching public key"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_BACKOFF) => controller.kick(),
                        _ = self.cancel.cancelled() => {}
                    }
                }
                Err(err) => {
                    if self.is_ready() {
                        // Warm: keep serving with the previously acquired
                        // set; the next periodic tick retries.
                        error!(
                            target: "bridge.task.key_refresh",
                            error = %err,
                            retry_after = ?self.interval,
                            "failed to refresh public key"
                        );
                        continue;
                    }

                    // Cold: the process cannot serve without a key.
                    let _ = self.ready_tx.send(ReadyState::Failed(Arc::new(err)));
                    return;
                }
            }
        }
    }

    async fn fetch_key_set(&self) -> Result<JwkSet, FetchError> {
        let url = self.endpoint_url();

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, FETCH_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transport {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        info!(
            target: "bridge.task.key_refresh",
            key_count = set.keys.len(),
            "public key set refreshed"
        );
        Ok(set)
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}{}",
            self.api_url.as_str().trim_end_matches('/'),
            PUBLIC_KEY_PATH
        )
    }
}

impl KeySetProvider for KeyRefreshWorker {
    fn key_set(&self) -> Arc<JwkSet> {
        Arc::clone(&self.key_set.read())
    }
}

/// Emits the worker's "tick" events.
///
/// The first tick fires immediately from the pre-filled retry slot;
/// subsequent ticks fire on interval expiry or an explicit [`kick`]. The
/// periodic timer is scheduled one full period out so the pre-filled slot
/// is the only immediate source.
///
/// [`kick`]: WorkController::kick
struct WorkController {
    retry_tx: mpsc::Sender<()>,
    retry_rx: mpsc::Receiver<()>,
    interval: tokio::time::Interval,
}

impl WorkController {
    fn new(period: Duration) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(1);
        // Pre-fill so the first tick fires immediately.
        let _ = retry_tx.try_send(());
        let start = tokio::time::Instant::now() + period;
        Self {
            retry_tx,
            retry_rx,
            interval: tokio::time::interval_at(start, period),
        }
    }

    /// Requests an immediate next tick. A full slot means one is already
    /// pending, which is just as good.
    fn kick(&self) {
        let _ = self.retry_tx.try_send(());
    }

    /// Waits for the next tick. Returns `false` once `cancel` has fired;
    /// the check runs both before and inside the wait, and the wait is
    /// biased toward cancellation, so a cancelled lifetime wins even when
    /// the retry slot is ready.
    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.retry_rx.recv() => true,
            _ = self.interval.tick() => true,
        }
    }
}
