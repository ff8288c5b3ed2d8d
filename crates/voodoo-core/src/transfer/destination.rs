//! Destination preconditions checked before any network call.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::error::TransferError;

/// Validate `path` and return the resume offset.
///
/// An existing regular file resumes at its length, or is deleted first when
/// `discard` is set. A missing file gets its parent folder created.
pub(crate) fn prepare(path: &Path, discard: bool) -> Result<u64, TransferError> {
    if path.as_os_str().is_empty() || path.file_name().is_none() {
        return Err(TransferError::InvalidDestination(path.to_path_buf()));
    }

    match fs::metadata(path) {
        Ok(meta) => {
            if !meta.is_file() {
                return Err(TransferError::NotResumable(path.to_path_buf()));
            }
            if meta.permissions().readonly() {
                return Err(TransferError::Overwrite {
                    path: path.to_path_buf(),
                    source: Arc::new(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "destination is read-only",
                    )),
                });
            }
            if discard {
                fs::remove_file(path).map_err(|e| TransferError::Overwrite {
                    path: path.to_path_buf(),
                    source: Arc::new(e),
                })?;
                return Ok(0);
            }
            Ok(meta.len())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            ensure_parent(path)?;
            Ok(0)
        }
        Err(e) => Err(TransferError::Inspect {
            path: path.to_path_buf(),
            source: Arc::new(e),
        }),
    }
}

fn ensure_parent(path: &Path) -> Result<(), TransferError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(TransferError::InvalidDestination(path.to_path_buf())),
        Err(_) => fs::create_dir_all(parent).map_err(|e| TransferError::CreateDir {
            path: parent.to_path_buf(),
            source: Arc::new(e),
        }),
    }
}
