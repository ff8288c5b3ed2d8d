//! Admission control for patch tasks.
//!
//! The queue keeps every managed task in one of two lanes (download or
//! extraction) and pauses or resumes tasks so the number running in each lane
//! stays within that lane's ceiling. All state sits behind one reentrant lock:
//! operations from other threads wait, while task callbacks fired from inside
//! an operation re-enter it on the same thread. Ceiling changes never tick in
//! place; they push a retick that runs once the outermost operation unwinds.

mod lane;
mod state;


pub use lane::{Lane, Profile};
pub use state::TaskKey;

use parking_lot::ReentrantMutex;
use serde::Serialize;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::config::QueueConfig;
use crate::task::{CommandOrigin, EventKind, PatchTask, TaskError, TaskEvent};

use state::{Deferred, QueueEntry, QueueState};

struct QueueInner {
    state: ReentrantMutex<RefCell<QueueState>>,
    fast: Profile,
    slow: Profile,
    /// Completion watchers run here, whichever thread calls `manage`.
    runtime: Handle,
}

/// Runs the closure on drop, unwinding included.
struct OnExit<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnExit<F> {
    fn drop(&mut self) {
        (self.0)()
    }
}

/// Handle to the scheduler. Clones share one registry.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub label: String,
    pub time_left: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LaneSnapshot {
    pub running: Vec<TaskSummary>,
    pub pending: Vec<TaskSummary>,
}

/// Point-in-time view of the queue, in admission order.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub max_downloads: usize,
    pub max_extractions: usize,
    pub downloads: LaneSnapshot,
    pub extractions: LaneSnapshot,
    /// Pause/resume commands that failed and were dropped.
    pub failed_commands: u64,
}

struct Fetched {
    key: TaskKey,
    task: Arc<dyn PatchTask>,
    time_left: Option<Duration>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("tasks", &self.len())
            .field("max_downloads", &self.max_downloads())
            .field("max_extractions", &self.max_extractions())
            .finish()
    }
}

impl Queue {
    /// New queue on the fast profile, watching task completions on the current tokio runtime.
    pub fn new(config: QueueConfig) -> Result<Self, TaskError> {
        let runtime = Handle::try_current().map_err(|_| TaskError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: QueueConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: ReentrantMutex::new(RefCell::new(QueueState::new(config.fast))),
                fast: config.fast,
                slow: config.slow,
                runtime,
            }),
        }
    }

    fn from_weak(weak: &Weak<QueueInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Queue { inner })
    }

    /// Short borrow of the state. `f` must not call into tasks or the queue.
    fn with_state<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Run one queue operation. Deferred work queued during it runs after the
    /// outermost operation returns, one item at a time.
    fn op<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = self.inner.state.lock();
        guard.borrow_mut().depth += 1;
        let depth = OnExit(|| guard.borrow_mut().depth -= 1);
        let result = f();
        drop(depth);
        let outermost = {
            let state = guard.borrow();
            state.depth == 0 && !state.draining
        };
        if outermost {
            self.drain();
        }
        result
    }

    fn drain(&self) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().draining = true;
        let _draining = OnExit(|| guard.borrow_mut().draining = false);
        loop {
            let next = guard.borrow_mut().deferred.pop_front();
            let Some(item) = next else {
                break;
            };
            match item {
                Deferred::Retick(lane) => self.op(|| {
                    let _in_flight =
                        OnExit(|| self.with_state(|st| *st.setting_mut(lane) = false));
                    tracing::debug!("deferred tick of {}", lane.name());
                    self.tick_lane(lane);
                }),
            }
        }
    }

    fn describe(&self, key: TaskKey) -> String {
        let record = self.with_state(|st| {
            st.registry
                .get(&key)
                .map(|e| (Arc::clone(&e.task), e.queued, e.time_left))
        });
        match record {
            Some((task, queued, time_left)) => format!(
                "{} (queued: {}, time left: {:?})",
                task.label(),
                queued,
                time_left
            ),
            None => format!("{:?} (unmanaged)", key),
        }
    }

    fn task_of(&self, key: TaskKey) -> Option<Arc<dyn PatchTask>> {
        self.with_state(|st| st.registry.get(&key).map(|e| Arc::clone(&e.task)))
    }

    pub fn max_downloads(&self) -> usize {
        self.with_state(|st| st.max_downloads)
    }

    pub fn max_extractions(&self) -> usize {
        self.with_state(|st| st.max_extractions)
    }

    pub fn len(&self) -> usize {
        self.with_state(|st| st.registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_managed(&self, task: &Arc<dyn PatchTask>) -> bool {
        let key = TaskKey::of(task);
        self.with_state(|st| st.registry.contains_key(&key))
    }

    /// Start supervising `task`. Refused (`None`) for finished or already managed tasks.
    /// A task arriving at a full lane is paused before this returns.
    pub fn manage(&self, task: Arc<dyn PatchTask>) -> Option<TaskKey> {
        self.op(|| {
            let label = task.label();
            if task.is_finished() {
                tracing::debug!("refusing to manage finished task {}", label);
                return None;
            }
            let key = TaskKey::of(&task);
            if self.with_state(|st| st.registry.contains_key(&key)) {
                tracing::debug!("{} is already managed", label);
                return None;
            }

            let lane = Lane::of(task.as_ref());
            let running = self.fetch_entries(true, Some(lane)).len();
            let managed = Arc::new(AtomicBool::new(true));
            let queued = self.with_state(|st| {
                let queued = running >= st.ceiling(lane);
                st.registry.insert(
                    key,
                    QueueEntry {
                        task: Arc::clone(&task),
                        queued,
                        time_left: None,
                        managed: Arc::clone(&managed),
                        subscriptions: Vec::new(),
                    },
                );
                queued
            });

            let subscriptions = EventKind::ALL
                .iter()
                .map(|kind| {
                    let weak = Arc::downgrade(&self.inner);
                    let flag = Arc::clone(&managed);
                    task.subscribe(
                        *kind,
                        Arc::new(move |event: &TaskEvent| {
                            if !flag.load(Ordering::SeqCst) {
                                return;
                            }
                            if let Some(queue) = Queue::from_weak(&weak) {
                                queue.handle_event(key, event);
                            }
                        }),
                    )
                })
                .collect::<Vec<_>>();
            self.with_state(|st| {
                if let Some(entry) = st.registry.get_mut(&key) {
                    entry.subscriptions = subscriptions;
                }
            });
            self.watch_completion(key, &task, managed);

            tracing::debug!("managing {} in {} lane", self.describe(key), lane.name());
            if queued {
                self.pause_task(key);
            }
            Some(key)
        })
    }

    fn watch_completion(&self, key: TaskKey, task: &Arc<dyn PatchTask>, managed: Arc<AtomicBool>) {
        let label = task.label();
        let completion = task.completion();
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            let result = completion.await;
            if !managed.load(Ordering::SeqCst) {
                return;
            }
            let Some(queue) = Queue::from_weak(&weak) else {
                return;
            };
            match &result {
                Ok(()) => tracing::debug!("{} finished", label),
                Err(e) => tracing::debug!("{} finished with error: {}", label, e),
            }
            queue.op(|| {
                let current = queue.with_state(|st| {
                    st.registry
                        .get(&key)
                        .is_some_and(|e| Arc::ptr_eq(&e.managed, &managed))
                });
                if current {
                    queue.unmanage_key(key);
                }
            });
        });
    }

    fn handle_event(&self, key: TaskKey, event: &TaskEvent) {
        self.op(|| match event {
            TaskEvent::Progress { time_left } | TaskEvent::ExtractProgress { time_left } => {
                self.with_state(|st| {
                    if let Some(entry) = st.registry.get_mut(&key) {
                        entry.time_left = *time_left;
                    }
                });
                tracing::trace!("updated time left of {}", self.describe(key));
            }
            TaskEvent::Extracting => {
                tracing::debug!("{} moved to extraction", self.describe(key));
                let running = self.fetch_entries(true, Some(Lane::Extraction)).len();
                // Strict: the running count already includes this task.
                if running > self.max_extractions() {
                    self.pause_task(key);
                }
            }
            TaskEvent::Paused { by_queue } | TaskEvent::Resumed { by_queue } => {
                let paused = matches!(event, TaskEvent::Paused { .. });
                if *by_queue {
                    self.with_state(|st| {
                        if let Some(entry) = st.registry.get_mut(&key) {
                            entry.queued = paused;
                        }
                    });
                    tracing::debug!(
                        "{} acknowledged by {}",
                        if paused { "pause" } else { "resume" },
                        self.describe(key)
                    );
                } else {
                    tracing::debug!(
                        "{} {} externally",
                        self.describe(key),
                        if paused { "paused" } else { "resumed" }
                    );
                    self.unmanage_key(key);
                }
            }
            TaskEvent::Canceled => {
                tracing::debug!("{} canceled", self.describe(key));
                self.unmanage_key(key);
            }
        })
    }

    /// Stop supervising `task` and rebalance both lanes. False if it was not managed.
    pub fn unmanage(&self, task: &Arc<dyn PatchTask>) -> bool {
        self.unmanage_key(TaskKey::of(task))
    }

    fn unmanage_key(&self, key: TaskKey) -> bool {
        self.op(|| {
            let Some(entry) = self.with_state(|st| st.registry.shift_remove(&key)) else {
                return false;
            };
            for id in &entry.subscriptions {
                entry.task.unsubscribe(*id);
            }
            entry.managed.store(false, Ordering::SeqCst);
            tracing::debug!("unmanaged {}", entry.task.label());
            self.tick(None);
            true
        })
    }

    fn fetch_entries(&self, running: bool, lane: Option<Lane>) -> Vec<Fetched> {
        let candidates = self.with_state(|st| {
            st.registry
                .iter()
                .filter(|(_, e)| e.queued != running)
                .map(|(key, e)| Fetched {
                    key: *key,
                    task: Arc::clone(&e.task),
                    time_left: e.time_left,
                })
                .collect::<Vec<_>>()
        });
        let mut matching: Vec<Fetched> = candidates
            .into_iter()
            .filter(|f| lane.map_or(true, |l| Lane::of(f.task.as_ref()) == l))
            .collect();
        matching.sort_by_key(|f| (f.time_left.is_none(), f.time_left));
        matching
    }

    /// Running (`queued == false`) or pending tasks, optionally of one lane,
    /// soonest-finishing first. Unknown estimates sort last.
    pub fn fetch(&self, running: bool, lane: Option<Lane>) -> Vec<Arc<dyn PatchTask>> {
        self.op(|| {
            self.fetch_entries(running, lane)
                .into_iter()
                .map(|f| f.task)
                .collect()
        })
    }

    /// Rebalance one lane, or both (extraction first) when `lane` is `None`.
    pub fn tick(&self, lane: Option<Lane>) {
        self.op(|| match lane {
            Some(lane) => self.tick_lane(lane),
            None => {
                for lane in Lane::TICK_ORDER {
                    self.tick_lane(lane);
                }
            }
        })
    }

    fn tick_lane(&self, lane: Lane) {
        let running = self.fetch_entries(true, Some(lane));
        let pending = self.fetch_entries(false, Some(lane));
        let ceiling = self.with_state(|st| st.ceiling(lane));
        let slack = ceiling as i64 - running.len() as i64;
        tracing::debug!(
            "ticking {}: running {}, pending {}, ceiling {}",
            lane.name(),
            running.len(),
            pending.len(),
            ceiling
        );
        if slack > 0 {
            for f in pending.iter().take(slack as usize) {
                self.resume_task(f.key);
            }
        } else if slack < 0 {
            for f in running.iter().take(slack.unsigned_abs() as usize) {
                self.pause_task(f.key);
            }
        }
    }

    /// Best effort: a failing command is logged and counted, never retried.
    fn command(&self, key: TaskKey, pause: bool) -> bool {
        let Some(task) = self.task_of(key) else {
            return false;
        };
        tracing::debug!(
            "{} {}",
            if pause { "pausing" } else { "resuming" },
            self.describe(key)
        );
        let result = if pause {
            task.stop(CommandOrigin::Queue)
        } else {
            task.start(CommandOrigin::Queue)
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "failed to {} {}: {}",
                    if pause { "pause" } else { "resume" },
                    task.label(),
                    e
                );
                self.with_state(|st| st.failed_commands += 1);
                false
            }
        }
    }

    fn pause_task(&self, key: TaskKey) -> bool {
        self.command(key, true)
    }

    fn resume_task(&self, key: TaskKey) -> bool {
        self.command(key, false)
    }

    pub fn set_max_downloads(&self, n: usize) -> bool {
        self.set_max(Lane::Download, n)
    }

    pub fn set_max_extractions(&self, n: usize) -> bool {
        self.set_max(Lane::Extraction, n)
    }

    /// Returns false if a change for `lane` is still in flight. Otherwise the
    /// ceiling is set now and the lane is ticked after the current operation.
    fn set_max(&self, lane: Lane, n: usize) -> bool {
        self.op(|| {
            let accepted = self.with_state(|st| {
                let setting = st.setting_mut(lane);
                if *setting {
                    return false;
                }
                *setting = true;
                st.set_ceiling(lane, n);
                st.deferred.push_back(Deferred::Retick(lane));
                true
            });
            if accepted {
                tracing::debug!("max {} set to {}", lane.name(), n);
            } else {
                tracing::debug!("can't set max {} now, a change is in progress", lane.name());
            }
            accepted
        })
    }

    fn apply_profile(&self, profile: Profile) {
        self.op(|| {
            self.with_state(|st| st.apply(profile));
            self.tick(None);
        })
    }

    pub fn faster(&self) {
        tracing::info!("applying fast profile");
        self.apply_profile(self.inner.fast);
    }

    pub fn slower(&self) {
        tracing::info!("applying slow profile");
        self.apply_profile(self.inner.slow);
    }

    /// Drop every task, restore the fast profile, then cancel (or stop) the
    /// dropped tasks and wait for them. Results are in registry order.
    pub async fn reset(&self, cancel: bool) -> Vec<Result<(), TaskError>> {
        let tasks = self.op(|| {
            let entries = self.with_state(|st| {
                st.registry
                    .iter()
                    .map(|(key, e)| (*key, Arc::clone(&e.task)))
                    .collect::<Vec<_>>()
            });
            for (key, _) in &entries {
                self.unmanage_key(*key);
            }
            let fast = self.inner.fast;
            self.with_state(|st| {
                st.apply(fast);
                st.setting_downloads = false;
                st.setting_extractions = false;
                st.registry.clear();
            });
            entries.into_iter().map(|(_, task)| task).collect::<Vec<_>>()
        });
        tracing::info!("resetting {} tasks (cancel: {})", tasks.len(), cancel);

        if !cancel {
            return tasks
                .iter()
                .map(|task| task.stop(CommandOrigin::External))
                .collect();
        }

        let mut set = JoinSet::new();
        for (i, task) in tasks.iter().enumerate() {
            let fut = task.cancel();
            set.spawn(async move { (i, fut.await) });
        }
        let mut results: Vec<Option<Result<(), TaskError>>> = vec![None; tasks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, result)) => results[i] = Some(result),
                Err(e) => tracing::warn!("cancel task failed: {}", e),
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(TaskError::Command("cancel did not complete".into()))))
            .collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.op(|| {
            let lane_snapshot = |lane: Lane| {
                let summarize = |f: Fetched| TaskSummary {
                    label: f.task.label(),
                    time_left: f.time_left,
                };
                LaneSnapshot {
                    running: self
                        .fetch_entries(true, Some(lane))
                        .into_iter()
                        .map(summarize)
                        .collect(),
                    pending: self
                        .fetch_entries(false, Some(lane))
                        .into_iter()
                        .map(summarize)
                        .collect(),
                }
            };
            let downloads = lane_snapshot(Lane::Download);
            let extractions = lane_snapshot(Lane::Extraction);
            self.with_state(|st| QueueSnapshot {
                max_downloads: st.max_downloads,
                max_extractions: st.max_extractions,
                downloads,
                extractions,
                failed_commands: st.failed_commands,
            })
        })
    }
}
