//! Easy2 handler for one transfer session.
//! Judges each response header block, then streams the body into the sink.

use std::path::PathBuf;
use std::str;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::sampler::SpeedSampler;

use super::content_range::{parse_content_range, parse_http_status};
use super::error::TransferError;
use super::sink::Sink;
use super::worker::StopToken;
use super::{Shared, TransferOptions, TransferState};

/// Sent once per session: `Ok` when streaming began (or nothing was left to fetch).
pub(super) type Verdict = Result<(), TransferError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    /// No final response judged yet (1xx, followed 3xx, or headers still arriving).
    Waiting,
    Streaming,
    /// 416: the destination already holds the whole resource.
    AlreadyComplete,
}

pub(super) struct TransferHandler {
    shared: Arc<Shared>,
    destination: PathBuf,
    offset: u64,
    options: TransferOptions,
    stop: StopToken,
    pub(super) response_headers: Vec<String>,
    pub(super) phase: Phase,
    pub(super) sink: Option<Sink>,
    pub(super) sampler: Option<SpeedSampler>,
    /// First failure seen inside a callback; takes precedence over curl's own error.
    pub(super) failure: Option<TransferError>,
    pub(super) ready: Option<oneshot::Sender<Verdict>>,
    pub(super) received: u64,
}

impl TransferHandler {
    pub(super) fn new(
        shared: Arc<Shared>,
        offset: u64,
        options: TransferOptions,
        stop: StopToken,
        ready: oneshot::Sender<Verdict>,
    ) -> Self {
        let destination = shared.destination.clone();
        Self {
            shared,
            destination,
            offset,
            options,
            stop,
            response_headers: Vec::new(),
            phase: Phase::Waiting,
            sink: None,
            sampler: None,
            failure: None,
            ready: Some(ready),
            received: 0,
        }
    }

    fn judge(&mut self) -> Result<(), TransferError> {
        let status = parse_http_status(&self.response_headers).unwrap_or(0);
        match status {
            // Interim or redirect block; curl follows redirects, a final 3xx is judged after perform.
            100..=199 | 300..=399 => Ok(()),
            416 => {
                tracing::debug!(
                    "{} already complete at {} bytes",
                    self.destination.display(),
                    self.offset
                );
                self.shared.total_size.store(self.offset, Ordering::Relaxed);
                self.phase = Phase::AlreadyComplete;
                Ok(())
            }
            206 => {
                let range = parse_content_range(&self.response_headers)?;
                if range.start != self.offset {
                    return Err(TransferError::RangeMismatch {
                        expected: self.offset,
                        actual: range.start,
                    });
                }
                self.shared.total_size.store(range.total, Ordering::Relaxed);
                let sink = Sink::open(&self.destination, self.options.decompress)
                    .map_err(|e| TransferError::write(&self.destination, e))?;
                self.sink = Some(sink);
                self.sampler = Some(SpeedSampler::new(
                    self.options.sample_interval,
                    self.options.sample_window,
                ));
                self.phase = Phase::Streaming;
                self.shared.set_state(TransferState::Started);
                tracing::info!(
                    "streaming {} from byte {} of {}",
                    self.destination.display(),
                    range.start,
                    range.total
                );
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
                Ok(())
            }
            other => Err(TransferError::BadStatus(other)),
        }
    }

    /// Emit whatever the sampler holds; called once the body ended.
    pub(super) fn flush_progress(&mut self) {
        if let Some(sample) = self.sampler.as_mut().and_then(|s| s.flush(Instant::now())) {
            self.shared.emit_progress(sample);
        }
    }
}

impl curl::easy::Handler for TransferHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        let Ok(s) = str::from_utf8(data) else {
            return true;
        };
        let line = s.trim_end();
        if line.starts_with("HTTP/") {
            self.response_headers.clear();
            self.response_headers.push(line.to_string());
            return true;
        }
        if !line.is_empty() {
            self.response_headers.push(line.to_string());
            return true;
        }
        if self.phase != Phase::Waiting {
            return true;
        }
        match self.judge() {
            Ok(()) => true,
            Err(e) => {
                self.failure = Some(e);
                false
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        if self.stop.is_requested() {
            return Ok(0);
        }
        if self.phase != Phase::Streaming {
            // Bodies of interim, redirect and 416 responses are discarded.
            return Ok(data.len());
        }
        let n = data.len() as u64;
        self.received += n;
        self.shared.total_downloaded.fetch_add(n, Ordering::Relaxed);
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.record(n);
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_all(data) {
                self.failure = Some(TransferError::write(&self.destination, e));
                return Ok(0);
            }
        }
        Ok(data.len())
    }

    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        if self.stop.is_requested() {
            return false;
        }
        if let Some(sample) = self.sampler.as_mut().and_then(|s| s.poll(Instant::now())) {
            self.shared.emit_progress(sample);
        }
        true
    }
}
