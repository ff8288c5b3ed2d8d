//! Session futures: one completion per span from `start()` to terminal resolution.

use tokio::sync::watch;

use super::error::TransferError;

#[derive(Debug, Clone)]
pub enum SessionStatus {
    Pending,
    Resolved,
    Rejected(TransferError),
}

impl SessionStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

/// Awaitable view of one session. Cheap to clone; every clone observes the same outcome.
#[derive(Debug, Clone)]
pub struct Session {
    rx: watch::Receiver<SessionStatus>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.rx.borrow().clone()
    }

    /// Resolve once the session finished or failed.
    pub async fn wait(mut self) -> Result<(), TransferError> {
        let status = match self.rx.wait_for(SessionStatus::is_settled).await {
            Ok(status) => status.clone(),
            Err(_) => return Err(TransferError::WorkerLost),
        };
        match status {
            SessionStatus::Rejected(e) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Owner side, held by the transfer handle.
#[derive(Debug)]
pub(crate) struct SessionSlot {
    tx: watch::Sender<SessionStatus>,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionStatus::Pending);
        Self { tx }
    }

    pub(crate) fn session(&self) -> Session {
        Session {
            rx: self.tx.subscribe(),
        }
    }

    /// Begin a new session if the current one was rejected; otherwise keep it.
    pub(crate) fn renew_if_rejected(&mut self) {
        if matches!(*self.tx.borrow(), SessionStatus::Rejected(_)) {
            *self = Self::new();
        }
    }

    pub(crate) fn resolve(&self) {
        self.tx.send_replace(SessionStatus::Resolved);
    }

    pub(crate) fn reject(&self, e: TransferError) {
        self.tx.send_replace(SessionStatus::Rejected(e));
    }
}
