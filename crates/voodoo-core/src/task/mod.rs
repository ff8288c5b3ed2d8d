//! The contract the queue schedules against.
//!
//! A task has a download phase followed (optionally) by an extraction phase,
//! accepts start/stop commands tagged with their origin, reports lifecycle
//! events to subscribers and exposes a single completion future.

mod transfer_task;

pub use transfer_task::TransferTask;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::listeners::SubscriptionId;
use crate::transfer::TransferError;

/// Who issued a start/stop command. Echoed back as `by_queue` in the
/// resulting `Paused`/`Resumed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    Queue,
    External,
}

impl CommandOrigin {
    pub fn by_queue(self) -> bool {
        self == CommandOrigin::Queue
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Download-phase progress.
    Progress { time_left: Option<Duration> },
    /// The task moved from its download phase into extraction.
    Extracting,
    ExtractProgress { time_left: Option<Duration> },
    Paused { by_queue: bool },
    Resumed { by_queue: bool },
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Extracting,
    ExtractProgress,
    Paused,
    Resumed,
    Canceled,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Progress,
        EventKind::Extracting,
        EventKind::ExtractProgress,
        EventKind::Paused,
        EventKind::Resumed,
        EventKind::Canceled,
    ];
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::Progress { .. } => EventKind::Progress,
            TaskEvent::Extracting => EventKind::Extracting,
            TaskEvent::ExtractProgress { .. } => EventKind::ExtractProgress,
            TaskEvent::Paused { .. } => EventKind::Paused,
            TaskEvent::Resumed { .. } => EventKind::Resumed,
            TaskEvent::Canceled => EventKind::Canceled,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("task canceled")]
    Canceled,
    #[error("task already finished or canceled")]
    Settled,
    #[error("task command failed: {0}")]
    Command(String),
    #[error("no tokio runtime available to drive the task")]
    NoRuntime,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

pub type EventHandler = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// A schedulable unit of work.
///
/// Commands and subscriptions are synchronous and may be called from inside an
/// event handler; events may be delivered synchronously from within a command.
pub trait PatchTask: Send + Sync {
    /// Short name for logs.
    fn label(&self) -> String;

    /// True while the task is in its download phase, false once extracting.
    fn is_download_phase(&self) -> bool;

    fn is_finished(&self) -> bool;

    fn start(&self, origin: CommandOrigin) -> Result<(), TaskError>;

    fn stop(&self, origin: CommandOrigin) -> Result<(), TaskError>;

    /// Abort the task for good; resolves once its resources are released.
    fn cancel(&self) -> TaskFuture;

    /// Register `handler` for events of `kind` only.
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Resolves with the task's terminal outcome.
    fn completion(&self) -> TaskFuture;
}
