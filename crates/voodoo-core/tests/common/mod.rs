#![allow(dead_code)]

pub mod range_server;

use std::time::Duration;

/// Deterministic test body of `len` bytes.
pub fn body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

/// Options with a short sampling interval so progress shows up in tests.
pub fn fast_sampling() -> voodoo_core::transfer::TransferOptions {
    voodoo_core::transfer::TransferOptions {
        sample_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}
