//! Append-mode destination writer with an optional decompression filter.

use flate2::write::{GzDecoder, ZlibDecoder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Decompression applied between the wire and the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decompression {
    Gzip,
    Zlib,
}

pub(crate) enum Sink {
    Plain(File),
    Gzip(GzDecoder<File>),
    Zlib(ZlibDecoder<File>),
}

impl Sink {
    pub(crate) fn open(path: &Path, decompress: Option<Decompression>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(match decompress {
            None => Sink::Plain(file),
            Some(Decompression::Gzip) => Sink::Gzip(GzDecoder::new(file)),
            Some(Decompression::Zlib) => Sink::Zlib(ZlibDecoder::new(file)),
        })
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Sink::Plain(f) => f.write_all(data),
            Sink::Gzip(d) => d.write_all(data),
            Sink::Zlib(d) => d.write_all(data),
        }
    }

    /// Flush the decoder tail and the file.
    pub(crate) fn finish(self) -> io::Result<()> {
        let mut file = match self {
            Sink::Plain(f) => f,
            Sink::Gzip(d) => d.finish()?,
            Sink::Zlib(d) => d.finish()?,
        };
        file.flush()?;
        file.sync_all()
    }
}
