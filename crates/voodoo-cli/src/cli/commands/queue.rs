//! `voodoo queue <url>...` – run several transfers under one queue.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use voodoo_core::config::VoodooConfig;
use voodoo_core::queue::{LaneSnapshot, Queue, QueueSnapshot};
use voodoo_core::task::{PatchTask, TransferTask};
use voodoo_core::transfer::TransferHandle;

use super::fetch::destination_in;

#[derive(Debug)]
pub struct QueueArgs {
    pub dir: PathBuf,
    pub max_downloads: Option<usize>,
    pub json: bool,
    pub urls: Vec<String>,
}

fn print_lane(name: &str, lane: &LaneSnapshot) {
    println!(
        "{:<12} {} running, {} pending",
        name,
        lane.running.len(),
        lane.pending.len()
    );
}

fn print_snapshot(snapshot: &QueueSnapshot) {
    println!(
        "ceilings: {} downloads, {} extractions",
        snapshot.max_downloads, snapshot.max_extractions
    );
    print_lane("downloads", &snapshot.downloads);
    print_lane("extractions", &snapshot.extractions);
    if snapshot.failed_commands > 0 {
        println!("dropped commands: {}", snapshot.failed_commands);
    }
}

pub async fn run_queue(cfg: &VoodooConfig, args: QueueArgs) -> Result<()> {
    let queue = Queue::new(cfg.queue.clone())?;
    if let Some(n) = args.max_downloads {
        queue.set_max_downloads(n);
    }

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let dest = destination_in(&args.dir, url)?;
        if !seen.insert(dest.clone()) {
            bail!("two URLs map to the same destination {}", dest.display());
        }
        let handle = TransferHandle::new(url, &dest, cfg.transfer.transfer_options())?;
        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());
        tasks.push(TransferTask::new(label, handle)?);
    }

    for task in &tasks {
        let as_task: Arc<dyn PatchTask> = task.clone();
        if queue.manage(as_task).is_none() {
            tracing::info!("{} was not queued", task.label());
        }
    }
    for task in &tasks {
        task.begin();
    }

    let mut failed = 0usize;
    for task in &tasks {
        match task.completion().await {
            Ok(()) => println!(
                "{:<32} ok ({} bytes)",
                task.label(),
                task.transfer().total_downloaded()
            ),
            Err(e) => {
                failed += 1;
                println!("{:<32} failed: {}", task.label(), e);
            }
        }
    }

    let snapshot = queue.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }

    if failed > 0 {
        bail!("{} of {} transfers failed", failed, tasks.len());
    }
    Ok(())
}
