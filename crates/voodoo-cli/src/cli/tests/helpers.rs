//! Tests for the command helpers that need no network.

use crate::cli::commands::{destination_in, format_progress};
use std::path::Path;
use std::time::Duration;
use voodoo_core::sampler::{Sample, SampleUnit};
use voodoo_core::transfer::TransferProgress;

#[test]
fn destination_uses_last_path_segment() {
    let dest = destination_in(Path::new("/tmp/dl"), "https://cdn.example.com/b/1/game.tar").unwrap();
    assert_eq!(dest, Path::new("/tmp/dl/game.tar"));
}

#[test]
fn destination_needs_a_file_name() {
    assert!(destination_in(Path::new("/tmp"), "https://cdn.example.com/").is_err());
}

#[test]
fn progress_line_shows_percent_rate_and_eta() {
    let p = TransferProgress {
        fraction: 0.5,
        time_left: Some(Duration::from_secs(12)),
        sample: Sample {
            current: 2.0,
            current_average: 1.5,
            average: 1.0,
            peak: 3.0,
            low: 0.5,
            bytes: 1024,
            unit: SampleUnit::MBps,
        },
    };
    let line = format_progress(&p);
    assert!(line.contains("50.0%"), "{}", line);
    assert!(line.contains("1.50 MiB/s"), "{}", line);
    assert!(line.contains("ETA 12s"), "{}", line);

    let unknown = format_progress(&TransferProgress {
        time_left: None,
        ..p
    });
    assert!(unknown.contains("ETA ?"));
}
