//! Content digests used to confirm copy integrity.

pub use crate::models::config::ChecksumAlgorithm;
use crate::Result;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for streaming reads (1 MiB; array disks are spinning rust).
const BUFFER_SIZE: usize = 1024 * 1024;

/// Computes a content digest of a file.
pub trait ChecksumVerifier: Send + Sync {
    /// Hex-encoded digest of the file at `path`.
    fn digest(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<String>;
}

/// Streaming digest over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileChecksummer;

impl ChecksumVerifier for FileChecksummer {
    fn digest(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
        digest_file(path, algorithm)
    }
}

/// Compute the digest of a file.
pub fn digest_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let file = File::open(path).map_err(|e| {
        crate::Error::io_failure(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let reader = BufReader::with_capacity(BUFFER_SIZE, file);

    match algorithm {
        ChecksumAlgorithm::Md5 => hash_reader::<Md5, _>(reader, path),
        ChecksumAlgorithm::Sha256 => hash_reader::<Sha256, _>(reader, path),
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R, path: &Path) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| {
            crate::Error::io_failure(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
