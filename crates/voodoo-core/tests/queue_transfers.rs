//! Integration tests: real transfers admitted by the queue.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::range_server::{self, RangeServerOptions};
use tempfile::tempdir;
use voodoo_core::config::QueueConfig;
use voodoo_core::queue::{Profile, Queue};
use voodoo_core::task::{PatchTask, TransferTask};
use voodoo_core::transfer::{TransferHandle, TransferState};

fn queue_with_downloads(downloads: usize) -> Queue {
    Queue::new(QueueConfig {
        fast: Profile {
            downloads,
            extractions: 1,
        },
        slow: Profile {
            downloads: 0,
            extractions: 0,
        },
    })
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ceiling_of_one_runs_transfers_one_at_a_time() {
    let body = common::body(8 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_size: 1024,
            chunk_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let queue = queue_with_downloads(1);

    let mut tasks = Vec::new();
    for i in 0..3 {
        let dest = dir.path().join(format!("part-{}.bin", i));
        let handle = TransferHandle::new(&server.url, &dest, common::fast_sampling()).unwrap();
        let task = TransferTask::new(format!("part-{}", i), handle).unwrap();
        let as_patch: Arc<dyn PatchTask> = task.clone();
        assert!(queue.manage(as_patch).is_some());
        tasks.push(task);
    }
    let began: Vec<bool> = tasks.iter().map(|t| t.begin()).collect();
    assert_eq!(began, vec![true, false, false], "queued tasks wait for a slot");

    let snapshot = queue.snapshot();
    assert_eq!(snapshot.downloads.running.len(), 1);
    assert_eq!(snapshot.downloads.pending.len(), 2);

    let completions: Vec<_> = tasks.iter().map(|t| t.completion()).collect();
    let all = async {
        for c in completions {
            c.await.unwrap();
        }
    };
    let watch = async {
        loop {
            let started = tasks
                .iter()
                .filter(|t| t.transfer().state() == TransferState::Started)
                .count();
            assert!(started <= 1, "{} transfers streaming at once", started);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(20), async {
        tokio::select! {
            _ = all => {}
            _ = watch => {}
        }
    })
    .await
    .expect("all transfers complete");

    for (i, task) in tasks.iter().enumerate() {
        assert!(task.is_finished());
        let dest = dir.path().join(format!("part-{}.bin", i));
        assert_eq!(fs::read(dest).unwrap(), body);
    }
    assert_eq!(server.ranges(), vec!["bytes=0-"; 3]);

    // Completion handling runs on the runtime; give it a moment to unmanage.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue drains");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_without_cancel_leaves_tasks_paused() {
    let server = range_server::start_with_options(
        common::body(64 * 1024),
        RangeServerOptions {
            chunk_size: 1024,
            chunk_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );
    let dir = tempdir().unwrap();
    let queue = queue_with_downloads(2);

    let handle = TransferHandle::new(&server.url, dir.path().join("a.bin"), common::fast_sampling())
        .unwrap();
    let task = TransferTask::new("a", handle).unwrap();
    let as_patch: Arc<dyn PatchTask> = task.clone();
    queue.manage(as_patch).unwrap();
    assert!(task.begin());

    tokio::time::timeout(Duration::from_secs(5), async {
        while task.transfer().state() != TransferState::Started {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transfer starts");

    let results = queue.reset(false).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    assert!(queue.is_empty());

    tokio::time::timeout(Duration::from_secs(5), async {
        while task.transfer().state() != TransferState::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transfer stops");
    assert!(!task.is_finished());
}
