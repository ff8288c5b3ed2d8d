//! `voodoo fetch <url> [dest]` – one resumable transfer with a progress line.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use voodoo_core::config::VoodooConfig;
use voodoo_core::sampler::SampleUnit;
use voodoo_core::transfer::{Decompression, TransferHandle, TransferProgress};
use voodoo_core::url_name::file_name_from_url;

#[derive(Debug)]
pub struct FetchArgs {
    pub url: String,
    pub dest: Option<PathBuf>,
    pub overwrite: bool,
    pub gunzip: bool,
}

/// Destination for `url` inside `dir` when none was given explicitly.
pub(crate) fn destination_in(dir: &Path, url: &str) -> Result<PathBuf> {
    let name = file_name_from_url(url)
        .with_context(|| format!("cannot derive a file name from {}", url))?;
    Ok(dir.join(name))
}

pub(crate) fn format_progress(p: &TransferProgress) -> String {
    let eta = p
        .time_left
        .map(|t| format!("{}s", t.as_secs()))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{:5.1}%  {:.2} {}  ETA {}",
        p.fraction * 100.0,
        p.sample.current_average,
        p.sample.unit.suffix(),
        eta
    )
}

pub async fn run_fetch(cfg: &VoodooConfig, args: FetchArgs) -> Result<()> {
    let dest = match args.dest {
        Some(d) => d,
        None => destination_in(&std::env::current_dir()?, &args.url)?,
    };
    let mut options = cfg.transfer.transfer_options();
    options.overwrite = args.overwrite;
    if args.gunzip {
        options.decompress = Some(Decompression::Gzip);
    }

    let handle = TransferHandle::new(&args.url, &dest, options)?;
    handle.on_progress(SampleUnit::MBps, |p| {
        print!("\r  {}  ", format_progress(p));
        let _ = std::io::stdout().flush();
    });

    if !handle.start().await? {
        bail!("transfer to {} did not start", dest.display());
    }
    handle
        .wait()
        .await
        .with_context(|| format!("downloading {}", args.url))?;
    println!();
    println!(
        "Saved {} ({} bytes)",
        dest.display(),
        handle.total_downloaded()
    );
    Ok(())
}
