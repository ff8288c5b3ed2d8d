//! Lanes and ceiling profiles.

use serde::{Deserialize, Serialize};

use crate::task::PatchTask;

/// One of the two independently throttled kinds of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Download,
    Extraction,
}

impl Lane {
    /// Order of a full scheduling pass.
    pub const TICK_ORDER: [Lane; 2] = [Lane::Extraction, Lane::Download];

    pub fn of(task: &dyn PatchTask) -> Lane {
        if task.is_download_phase() {
            Lane::Download
        } else {
            Lane::Extraction
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Lane::Download => "downloads",
            Lane::Extraction => "extractions",
        }
    }
}

/// A pair of ceilings applied to both lanes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub downloads: usize,
    pub extractions: usize,
}
