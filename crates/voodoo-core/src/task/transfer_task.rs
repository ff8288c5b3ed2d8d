//! A single `TransferHandle` exposed as a download-only `PatchTask`.

use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::listeners::{Listeners, SubscriptionId};
use crate::sampler::SampleUnit;
use crate::transfer::{lock, TransferHandle, TransferState};

use super::{CommandOrigin, EventHandler, EventKind, PatchTask, TaskError, TaskEvent, TaskFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Idle,
    Running,
    Paused,
    Canceled,
}

type Outcome = Option<Result<(), TaskError>>;

/// Commands update the desired state and emit their event immediately; the
/// transfer itself is brought in line by one serialized driver on the runtime.
pub struct TransferTask {
    label: String,
    transfer: TransferHandle,
    runtime: Handle,
    events: Listeners<TaskEvent>,
    desired: Mutex<Desired>,
    driver: tokio::sync::Mutex<()>,
    completion: watch::Sender<Outcome>,
    this: Weak<TransferTask>,
}

impl TransferTask {
    /// Wrap `transfer`, driving it on the current tokio runtime.
    pub fn new(label: impl Into<String>, transfer: TransferHandle) -> Result<Arc<Self>, TaskError> {
        let runtime = Handle::try_current().map_err(|_| TaskError::NoRuntime)?;
        Ok(Self::with_runtime(label, transfer, runtime))
    }

    pub fn with_runtime(label: impl Into<String>, transfer: TransferHandle, runtime: Handle) -> Arc<Self> {
        let (completion, _) = watch::channel(None);
        let task = Arc::new_cyclic(|this: &Weak<TransferTask>| {
            let weak = this.clone();
            transfer.on_progress(SampleUnit::Bps, move |p| {
                if let Some(task) = weak.upgrade() {
                    task.events.emit(&TaskEvent::Progress {
                        time_left: p.time_left,
                    });
                }
            });
            TransferTask {
                label: label.into(),
                transfer,
                runtime,
                events: Listeners::new(),
                desired: Mutex::new(Desired::Idle),
                driver: tokio::sync::Mutex::new(()),
                completion,
                this: this.clone(),
            }
        });
        task.watch_session();
        task
    }

    pub fn transfer(&self) -> &TransferHandle {
        &self.transfer
    }

    /// Start the transfer unless a command already decided its state.
    /// Returns false when the task was already started, paused or settled.
    pub fn begin(&self) -> bool {
        {
            let mut desired = lock(&self.desired);
            if *desired != Desired::Idle || self.is_settled() {
                return false;
            }
            *desired = Desired::Running;
        }
        tracing::debug!("{} begins", self.label);
        self.reconcile();
        true
    }

    fn is_settled(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Record the first terminal outcome. Returns false if one was already recorded.
    fn settle(&self, outcome: Result<(), TaskError>) -> bool {
        let label = &self.label;
        self.completion.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            match &outcome {
                Ok(()) => tracing::info!("{} completed", label),
                Err(e) => tracing::info!("{} settled: {}", label, e),
            }
            *current = Some(outcome.clone());
            true
        })
    }

    fn watch_session(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let mut settled = self.completion.subscribe();
        self.runtime.spawn(async move {
            tokio::select! {
                result = this.transfer.wait() => {
                    this.settle(result.map_err(TaskError::from));
                }
                _ = settled.wait_for(Option::is_some) => {}
            }
        });
    }

    fn reconcile(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.runtime.spawn(async move { this.drive().await });
    }

    /// Bring the transfer in line with the desired state, one action per pass.
    async fn drive(&self) {
        let _guard = self.driver.lock().await;
        loop {
            let want = *lock(&self.desired);
            match want {
                Desired::Running => {
                    if self.transfer.state() == TransferState::Stopped && !self.is_settled() {
                        if let Err(e) = self.transfer.start().await {
                            self.settle(Err(e.into()));
                            return;
                        }
                    }
                }
                Desired::Paused | Desired::Canceled => {
                    self.transfer.stop().await;
                }
                Desired::Idle => {}
            }
            if *lock(&self.desired) == want {
                break;
            }
        }
    }

    fn command(&self, origin: CommandOrigin, next: Desired) -> Result<(), TaskError> {
        {
            let mut desired = lock(&self.desired);
            if *desired == Desired::Canceled || self.is_settled() {
                return Err(TaskError::Settled);
            }
            *desired = next;
        }
        let by_queue = origin.by_queue();
        tracing::debug!("{} -> {:?} (by queue: {})", self.label, next, by_queue);
        self.events.emit(&match next {
            Desired::Paused => TaskEvent::Paused { by_queue },
            _ => TaskEvent::Resumed { by_queue },
        });
        self.reconcile();
        Ok(())
    }
}

impl PatchTask for TransferTask {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_download_phase(&self) -> bool {
        true
    }

    fn is_finished(&self) -> bool {
        self.transfer.state() == TransferState::Finished
            || matches!(*self.completion.borrow(), Some(Ok(())))
    }

    fn start(&self, origin: CommandOrigin) -> Result<(), TaskError> {
        self.command(origin, Desired::Running)
    }

    fn stop(&self, origin: CommandOrigin) -> Result<(), TaskError> {
        self.command(origin, Desired::Paused)
    }

    fn cancel(&self) -> TaskFuture {
        *lock(&self.desired) = Desired::Canceled;
        let this = self.this.upgrade();
        Box::pin(async move {
            let Some(this) = this else {
                return Ok(());
            };
            this.drive().await;
            if this.settle(Err(TaskError::Canceled)) {
                this.events.emit(&TaskEvent::Canceled);
            }
            Ok(())
        })
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.events.subscribe(Arc::new(move |event: &TaskEvent| {
            if event.kind() == kind {
                handler(event);
            }
        }))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn completion(&self) -> TaskFuture {
        let mut rx = self.completion.subscribe();
        Box::pin(async move {
            match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
                Err(_) => Err(TaskError::Canceled),
            }
        })
    }
}
