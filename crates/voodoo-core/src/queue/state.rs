//! Registry and ceilings guarded by the queue's single lock.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::listeners::SubscriptionId;
use crate::task::PatchTask;

use super::lane::{Lane, Profile};

/// Identity of a managed task: the address of its shared allocation.
/// Stable while the registry holds the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskKey(usize);

impl TaskKey {
    pub fn of(task: &Arc<dyn PatchTask>) -> Self {
        TaskKey(Arc::as_ptr(task) as *const () as usize)
    }
}

pub(super) struct QueueEntry {
    pub(super) task: Arc<dyn PatchTask>,
    /// Paused by the queue to respect a ceiling.
    pub(super) queued: bool,
    /// Latest estimate; `None` sorts last.
    pub(super) time_left: Option<Duration>,
    pub(super) managed: Arc<AtomicBool>,
    pub(super) subscriptions: Vec<SubscriptionId>,
}

/// Work scheduled to run after the outermost queue operation unwinds.
#[derive(Debug, Clone, Copy)]
pub(super) enum Deferred {
    /// Tick the lane, then clear its in-flight ceiling change.
    Retick(Lane),
}

pub(super) struct QueueState {
    pub(super) registry: IndexMap<TaskKey, QueueEntry>,
    pub(super) max_downloads: usize,
    pub(super) max_extractions: usize,
    pub(super) setting_downloads: bool,
    pub(super) setting_extractions: bool,
    /// Nesting of queue operations on the owning thread.
    pub(super) depth: usize,
    pub(super) draining: bool,
    pub(super) deferred: VecDeque<Deferred>,
    pub(super) failed_commands: u64,
}

impl QueueState {
    pub(super) fn new(profile: Profile) -> Self {
        Self {
            registry: IndexMap::new(),
            max_downloads: profile.downloads,
            max_extractions: profile.extractions,
            setting_downloads: false,
            setting_extractions: false,
            depth: 0,
            draining: false,
            deferred: VecDeque::new(),
            failed_commands: 0,
        }
    }

    pub(super) fn ceiling(&self, lane: Lane) -> usize {
        match lane {
            Lane::Download => self.max_downloads,
            Lane::Extraction => self.max_extractions,
        }
    }

    pub(super) fn set_ceiling(&mut self, lane: Lane, n: usize) {
        match lane {
            Lane::Download => self.max_downloads = n,
            Lane::Extraction => self.max_extractions = n,
        }
    }

    pub(super) fn apply(&mut self, profile: Profile) {
        self.max_downloads = profile.downloads;
        self.max_extractions = profile.extractions;
    }

    pub(super) fn setting_mut(&mut self, lane: Lane) -> &mut bool {
        match lane {
            Lane::Download => &mut self.setting_downloads,
            Lane::Extraction => &mut self.setting_extractions,
        }
    }
}
