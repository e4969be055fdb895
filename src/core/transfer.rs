//! Copy-verify-rename-delete file transfer.
//!
//! A transfer never overwrites an existing destination and never removes the
//! source before the destination holds a verified copy. On any failure the
//! filesystem is left as it was before the transfer, apart from I/O errors
//! during cleanup which are logged.

use crate::core::checksum::{ChecksumAlgorithm, ChecksumVerifier};
use crate::utils::fs::temp_path_for;
use crate::Result;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Result of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub file_size: u64,
    pub checksum: String,
}

/// Move `source` to `dest` with checksum verification.
///
/// When `expected` is given, the source must also match that digest
/// (used when playing back an undo entry).
pub async fn move_verified(
    source: &Path,
    dest: &Path,
    verifier: Arc<dyn ChecksumVerifier>,
    algorithm: ChecksumAlgorithm,
    expected: Option<String>,
) -> Result<TransferReport> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        move_verified_blocking(&source, &dest, verifier.as_ref(), algorithm, expected.as_deref())
    })
    .await
    .map_err(|e| crate::Error::other(format!("Transfer worker failed: {}", e)))?
}

/// Digest a file on a worker thread.
pub async fn digest_blocking(
    path: &Path,
    verifier: Arc<dyn ChecksumVerifier>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || verifier.digest(&path, algorithm))
        .await
        .map_err(|e| crate::Error::other(format!("Checksum worker failed: {}", e)))?
}

fn move_verified_blocking(
    source: &Path,
    dest: &Path,
    verifier: &dyn ChecksumVerifier,
    algorithm: ChecksumAlgorithm,
    expected: Option<&str>,
) -> Result<TransferReport> {
    if !source.is_file() {
        return Err(crate::Error::io_failure(format!(
            "Source file not found: {}",
            source.display()
        )));
    }
    if dest.exists() {
        return Err(crate::Error::PathConflict(format!(
            "Destination already exists: {}",
            dest.display()
        )));
    }

    let source_checksum = verifier.digest(source, algorithm)?;
    if let Some(expected) = expected {
        if expected != source_checksum {
            return Err(crate::Error::ChecksumMismatch {
                path: source.display().to_string(),
                expected: expected.to_string(),
                actual: source_checksum,
            });
        }
    }

    let temp = temp_path_for(dest);
    tracing::debug!("Copying {:?} -> {:?}", source, temp);
    if let Err(e) = copy_and_sync(source, &temp) {
        discard(&temp);
        return Err(crate::Error::io_failure(format!(
            "Failed to copy {} to {}: {}",
            source.display(),
            temp.display(),
            e
        )));
    }

    let copy_checksum = match verifier.digest(&temp, algorithm) {
        Ok(sum) => sum,
        Err(e) => {
            discard(&temp);
            return Err(e);
        }
    };
    if copy_checksum != source_checksum {
        discard(&temp);
        return Err(crate::Error::ChecksumMismatch {
            path: dest.display().to_string(),
            expected: source_checksum,
            actual: copy_checksum,
        });
    }

    if let Err(e) = fs::rename(&temp, dest) {
        discard(&temp);
        return Err(crate::Error::io_failure(format!(
            "Failed to finalize {}: {}",
            dest.display(),
            e
        )));
    }

    let file_size = fs::metadata(dest)?.len();

    // Destination is verified and in place; only now may the source go.
    if let Err(e) = fs::remove_file(source) {
        discard(dest);
        return Err(crate::Error::io_failure(format!(
            "Failed to remove source {}: {}",
            source.display(),
            e
        )));
    }

    tracing::debug!("Moved (copy+verify+delete): {:?} -> {:?}", source, dest);
    Ok(TransferReport {
        file_size,
        checksum: source_checksum,
    })
}

fn copy_and_sync(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to)?;
    fs::File::open(to)?.sync_all()
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}
