//! Transfer thread body: configure curl, perform, settle the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use curl::easy::Easy2;
use tokio::sync::oneshot;

use super::error::TransferError;
use super::handler::{Phase, TransferHandler, Verdict};
use super::{lock, Shared, TransferOptions, TransferState};

/// Shared stop flag polled by the curl write and progress callbacks.
#[derive(Debug, Clone, Default)]
pub(crate) struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub(crate) fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle kept by `TransferHandle` for the running thread.
pub(super) struct Worker {
    pub(super) stop: StopToken,
    pub(super) done: oneshot::Receiver<()>,
}

enum Outcome {
    Finished,
    Failed(TransferError),
}

pub(super) struct Job {
    pub(super) shared: Arc<Shared>,
    pub(super) url: String,
    pub(super) offset: u64,
    pub(super) options: TransferOptions,
    pub(super) stop: StopToken,
    pub(super) ready: oneshot::Sender<Verdict>,
    pub(super) done: oneshot::Sender<()>,
}

impl Job {
    pub(super) fn run(self) {
        let Job {
            shared,
            url,
            offset,
            options,
            stop,
            ready,
            done,
        } = self;

        let handler = TransferHandler::new(
            Arc::clone(&shared),
            offset,
            options.clone(),
            stop.clone(),
            ready,
        );
        let mut easy = Easy2::new(handler);
        let result = configure(&mut easy, &url, offset, &options).and_then(|()| easy.perform());
        let outcome = conclude(&shared, easy.get_mut(), result);
        let ready = easy.get_mut().ready.take();
        // Closes the destination file before the state changes.
        drop(easy);

        settle(&shared, &stop, outcome, ready);
        let _ = done.send(());
    }
}

fn configure(
    easy: &mut Easy2<TransferHandler>,
    url: &str,
    offset: u64,
    options: &TransferOptions,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.get(true)?;
    easy.follow_location(true)?;
    easy.max_redirections(options.max_redirections)?;
    easy.connect_timeout(options.connect_timeout)?;
    // Abort if throughput stays below the limit, instead of a hard wall-clock timeout.
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    easy.progress(true)?;
    easy.range(&format!("{}-", offset))?;
    Ok(())
}

fn conclude(
    shared: &Shared,
    handler: &mut TransferHandler,
    result: Result<(), curl::Error>,
) -> Outcome {
    if let Some(e) = handler.failure.take() {
        return Outcome::Failed(e);
    }
    if let Err(e) = result {
        return Outcome::Failed(TransferError::transport(e));
    }
    match handler.phase {
        Phase::AlreadyComplete => Outcome::Finished,
        Phase::Waiting => {
            let status = super::content_range::parse_http_status(&handler.response_headers);
            Outcome::Failed(TransferError::BadStatus(status.unwrap_or(0)))
        }
        Phase::Streaming => {
            handler.flush_progress();
            if let Some(sink) = handler.sink.take() {
                if let Err(e) = sink.finish() {
                    return Outcome::Failed(TransferError::write(&shared.destination, e));
                }
            }
            let expected = shared.total_size.load(Ordering::Relaxed);
            let received = shared.total_downloaded.load(Ordering::Relaxed);
            if received < expected {
                return Outcome::Failed(TransferError::Incomplete { expected, received });
            }
            Outcome::Finished
        }
    }
}

/// Single exit path for every session: set the final state, settle the
/// session future and answer a still-waiting `start()`.
fn settle(shared: &Shared, stop: &StopToken, outcome: Outcome, ready: Option<oneshot::Sender<Verdict>>) {
    let mut state = lock(&shared.state);
    let verdict = if stop.is_requested() || *state == TransferState::Stopping {
        tracing::debug!("{} stopped", shared.destination.display());
        *state = TransferState::Stopped;
        Ok(())
    } else {
        match outcome {
            Outcome::Finished => {
                tracing::info!(
                    "{} finished ({} bytes)",
                    shared.destination.display(),
                    shared.total_downloaded.load(Ordering::Relaxed)
                );
                *state = TransferState::Finished;
                lock(&shared.session).resolve();
                Ok(())
            }
            Outcome::Failed(e) => {
                tracing::warn!("{} failed: {}", shared.destination.display(), e);
                *state = TransferState::Stopped;
                lock(&shared.session).reject(e.clone());
                Err(e)
            }
        }
    };
    drop(state);
    if let Some(ready) = ready {
        let _ = ready.send(verdict);
    }
}
