//! Transfer error taxonomy and classification.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Coarse class of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Destination or input problems, reported before any network call.
    Precondition,
    /// The server answered, but not with a usable partial response.
    Protocol,
    /// Network or disk failure while streaming.
    Transport,
}

/// Finer classification of transport failures, for callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connection,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    #[error("destination {} is not resumable: not a regular file", .0.display())]
    NotResumable(PathBuf),

    #[error("invalid destination path {}", .0.display())]
    InvalidDestination(PathBuf),

    #[error("could not create destination folder {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("destination {} cannot be overwritten", .path.display())]
    Overwrite {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("could not inspect destination {}", .path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid url {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("bad status code {0}")]
    BadStatus(u32),

    #[error("missing or invalid content-range response header{}", .0.as_ref().map(|v| format!(": {v}")).unwrap_or_default())]
    MalformedContentRange(Option<String>),

    #[error("server resumed at byte {actual}, expected {expected}")]
    RangeMismatch { expected: u64, actual: u64 },

    #[error("transfer ended after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("transport error ({kind:?})")]
    Transport {
        kind: TransportKind,
        #[source]
        source: Arc<curl::Error>,
    },

    #[error("failed writing {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("transfer thread ended without reporting")]
    WorkerLost,
}

impl TransferError {
    pub(crate) fn transport(e: curl::Error) -> Self {
        TransferError::Transport {
            kind: classify_curl_error(&e),
            source: Arc::new(e),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, e: io::Error) -> Self {
        TransferError::Write {
            path: path.into(),
            source: Arc::new(e),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::NotResumable(_)
            | TransferError::InvalidDestination(_)
            | TransferError::CreateDir { .. }
            | TransferError::Overwrite { .. }
            | TransferError::Inspect { .. }
            | TransferError::InvalidUrl { .. } => ErrorClass::Precondition,
            TransferError::BadStatus(_)
            | TransferError::MalformedContentRange(_)
            | TransferError::RangeMismatch { .. } => ErrorClass::Protocol,
            TransferError::Incomplete { .. }
            | TransferError::Transport { .. }
            | TransferError::Write { .. }
            | TransferError::WorkerLost => ErrorClass::Transport,
        }
    }

    /// Transport sub-kind; `None` for errors that did not come from curl.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            TransferError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Classify a curl error into a transport kind.
pub fn classify_curl_error(e: &curl::Error) -> TransportKind {
    if e.is_operation_timedout() {
        return TransportKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return TransportKind::Connection;
    }
    TransportKind::Other
}
