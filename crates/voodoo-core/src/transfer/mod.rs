//! Resumable HTTP range download into a single destination file.
//!
//! A [`TransferHandle`] walks `Stopped -> Starting -> Started -> Stopping -> Stopped`,
//! or ends in `Finished`. Each `start()` resumes from the current destination
//! length with a `Range: bytes=<offset>-` request on a dedicated curl thread.
//! Completion is observed through the [`Session`] future, which survives
//! stop/start cycles and is only replaced after a rejection.

mod content_range;
mod destination;
mod error;
mod handler;
mod session;
mod sink;
mod worker;

pub use content_range::{parse_content_range, parse_http_status, ContentRange};
pub use error::{classify_curl_error, ErrorClass, TransferError, TransportKind};
pub use session::{Session, SessionStatus};
pub use sink::Decompression;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::listeners::{Listeners, SubscriptionId};
use crate::sampler::{Sample, SampleUnit};

use session::SessionSlot;
use worker::{Job, StopToken, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Finished,
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Discard an existing destination on the next start. Cleared after that start.
    pub overwrite: bool,
    /// Decode the body before it reaches disk. Such transfers always restart at offset 0.
    pub decompress: Option<Decompression>,
    pub sample_interval: Duration,
    pub sample_window: usize,
    pub connect_timeout: Duration,
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    pub max_redirections: u32,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            decompress: None,
            sample_interval: Duration::from_secs(1),
            sample_window: 5,
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            max_redirections: 10,
        }
    }
}

/// Delivered to progress listeners on every speed sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TransferProgress {
    /// `total_downloaded / total_size`, 0 while the size is unknown.
    pub fraction: f64,
    /// Remaining bytes over the windowed average rate; `None` while that rate is 0.
    pub time_left: Option<Duration>,
    pub sample: Sample,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    url: Mutex<String>,
    destination: PathBuf,
    options: Mutex<TransferOptions>,
    state: Mutex<TransferState>,
    total_size: AtomicU64,
    total_downloaded: AtomicU64,
    session: Mutex<SessionSlot>,
    progress: Listeners<TransferProgress>,
    worker: Mutex<Option<Worker>>,
}

impl Shared {
    fn set_state(&self, next: TransferState) {
        *lock(&self.state) = next;
    }

    /// Failure before streaming: back to Stopped and reject the session.
    fn fail(&self, e: TransferError) -> TransferError {
        tracing::warn!("{} failed to start: {}", self.destination.display(), e);
        let mut state = lock(&self.state);
        *state = TransferState::Stopped;
        lock(&self.session).reject(e.clone());
        e
    }

    fn emit_progress(&self, sample: Sample) {
        let total = self.total_size.load(Ordering::Relaxed);
        let downloaded = self.total_downloaded.load(Ordering::Relaxed);
        let fraction = if total == 0 {
            0.0
        } else {
            downloaded as f64 / total as f64
        };
        let time_left = (sample.current_average > 0.0).then(|| {
            let secs = total.saturating_sub(downloaded) as f64 / sample.current_average;
            Duration::from_secs(secs.round() as u64)
        });
        self.progress.emit(&TransferProgress {
            fraction,
            time_left,
            sample,
        });
    }
}

fn validate_url(url: &str) -> Result<String, TransferError> {
    url::Url::parse(url)
        .map(|u| u.to_string())
        .map_err(|source| TransferError::InvalidUrl {
            url: url.to_string(),
            source,
        })
}

/// One resumable transfer. Clones share the same transfer.
#[derive(Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("url", &self.url())
            .field("destination", &self.shared.destination)
            .field("state", &self.state())
            .finish()
    }
}

impl TransferHandle {
    pub fn new(
        url: &str,
        destination: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let url = validate_url(url)?;
        Ok(Self {
            shared: Arc::new(Shared {
                url: Mutex::new(url),
                destination: destination.into(),
                options: Mutex::new(options),
                state: Mutex::new(TransferState::Stopped),
                total_size: AtomicU64::new(0),
                total_downloaded: AtomicU64::new(0),
                session: Mutex::new(SessionSlot::new()),
                progress: Listeners::new(),
                worker: Mutex::new(None),
            }),
        })
    }

    #[cfg(test)]
    fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn url(&self) -> String {
        lock(&self.shared.url).clone()
    }

    pub fn destination(&self) -> &Path {
        &self.shared.destination
    }

    pub fn state(&self) -> TransferState {
        *lock(&self.shared.state)
    }

    /// Total resource size from the last Content-Range, 0 until known.
    pub fn total_size(&self) -> u64 {
        self.shared.total_size.load(Ordering::Relaxed)
    }

    /// Resume offset plus wire bytes received in this run.
    pub fn total_downloaded(&self) -> u64 {
        self.shared.total_downloaded.load(Ordering::Relaxed)
    }

    /// Whether the next start will discard the destination.
    pub fn overwrite(&self) -> bool {
        lock(&self.shared.options).overwrite
    }

    /// Start (or resume) from the current URL. See [`TransferHandle::start_from`].
    pub async fn start(&self) -> Result<bool, TransferError> {
        self.start_inner(None).await
    }

    /// Start (or resume) from `url`, which replaces the stored URL.
    ///
    /// Returns `Ok(false)` without side effects unless the handle is Stopped.
    /// `Ok(true)` once the body is streaming, or when the server reported the
    /// destination as already complete. On `Err` the session was rejected with
    /// the same error and the handle is Stopped again.
    pub async fn start_from(&self, url: &str) -> Result<bool, TransferError> {
        self.start_inner(Some(url)).await
    }

    async fn start_inner(&self, url: Option<&str>) -> Result<bool, TransferError> {
        let shared = &self.shared;
        {
            let mut state = lock(&shared.state);
            if *state != TransferState::Stopped {
                return Ok(false);
            }
            *state = TransferState::Starting;
        }
        lock(&shared.session).renew_if_rejected();

        if let Some(url) = url {
            let url = validate_url(url).map_err(|e| shared.fail(e))?;
            *lock(&shared.url) = url;
        }
        let url = lock(&shared.url).clone();
        let options = lock(&shared.options).clone();

        // Decoded bytes on disk cannot serve as a wire offset.
        let discard = options.overwrite || options.decompress.is_some();
        let offset =
            destination::prepare(&shared.destination, discard).map_err(|e| shared.fail(e))?;
        lock(&shared.options).overwrite = false;
        shared.total_size.store(0, Ordering::Relaxed);
        shared.total_downloaded.store(offset, Ordering::Relaxed);
        tracing::debug!(
            "starting {} -> {} at offset {}",
            url,
            shared.destination.display(),
            offset
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let stop = StopToken::default();
        *lock(&shared.worker) = Some(Worker {
            stop: stop.clone(),
            done: done_rx,
        });
        let job = Job {
            shared: Arc::clone(shared),
            url,
            offset,
            options,
            stop,
            ready: ready_tx,
            done: done_tx,
        };
        if let Err(e) = std::thread::Builder::new()
            .name("voodoo-transfer".to_string())
            .spawn(move || job.run())
        {
            tracing::warn!("failed to spawn transfer thread: {}", e);
            lock(&shared.worker).take();
            return Err(shared.fail(TransferError::WorkerLost));
        }

        match ready_rx.await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(shared.fail(TransferError::WorkerLost)),
        }
    }

    /// Stop a Started transfer and wait until the destination file is released.
    /// Returns false without side effects in any other state.
    pub async fn stop(&self) -> bool {
        let worker = {
            let mut state = lock(&self.shared.state);
            if *state != TransferState::Started {
                return false;
            }
            *state = TransferState::Stopping;
            lock(&self.shared.worker).take()
        };
        if let Some(worker) = worker {
            worker.stop.request();
            let _ = worker.done.await;
        }
        let mut state = lock(&self.shared.state);
        if *state == TransferState::Stopping {
            *state = TransferState::Stopped;
        }
        tracing::debug!(
            "{} stopped at {} bytes",
            self.shared.destination.display(),
            self.total_downloaded()
        );
        true
    }

    /// Register a progress listener; samples are converted to `unit`.
    pub fn on_progress<F>(&self, unit: SampleUnit, callback: F) -> SubscriptionId
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        self.shared.progress.subscribe(Arc::new(move |p: &TransferProgress| {
            let converted = TransferProgress {
                sample: p.sample.convert(unit),
                ..*p
            };
            callback(&converted)
        }))
    }

    pub fn off_progress(&self, id: SubscriptionId) -> bool {
        self.shared.progress.unsubscribe(id)
    }

    /// The current session.
    pub fn session(&self) -> Session {
        lock(&self.shared.session).session()
    }

    /// Wait for the current session to finish or fail.
    pub async fn wait(&self) -> Result<(), TransferError> {
        self.session().wait().await
    }
}
