//! Per-operation permission gate.

use super::{CheckStatus, PermissionCheck};
use std::path::Path;

/// Decides whether a move may touch the filesystem.
///
/// Consulted before any destructive step; an `Error` status blocks the move.
pub trait PermissionGate: Send + Sync {
    fn check_file_operation(&self, source: &Path, dest: &Path) -> PermissionCheck;
}

/// Gate backed by `access(2)` for the calling process.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPermissionGate;

impl PermissionGate for FsPermissionGate {
    fn check_file_operation(&self, source: &Path, dest: &Path) -> PermissionCheck {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source.display().to_string());
        let mut check = PermissionCheck::new("file_operation", &format!("Move {}", name));

        let mut errors = Vec::new();
        if !readable(source) {
            errors.push(format!("Source not readable: {}", source.display()));
        }
        // Removing the source needs write access to its directory.
        if let Some(parent) = source.parent() {
            if !writable(parent) {
                errors.push(format!("Source directory not writable: {}", parent.display()));
            }
        }
        match dest.parent() {
            Some(parent) if !parent.exists() => {
                errors.push(format!(
                    "Destination directory doesn't exist: {}",
                    parent.display()
                ));
            }
            Some(parent) if !writable(parent) => {
                errors.push(format!(
                    "Destination directory not writable: {}",
                    parent.display()
                ));
            }
            _ => {}
        }

        if !errors.is_empty() {
            check.status = CheckStatus::Error;
            check.error = Some(errors.join("; "));
        }
        check
    }
}

#[cfg(unix)]
pub(crate) fn readable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::R_OK).is_ok()
}

#[cfg(unix)]
pub(crate) fn writable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
pub(crate) fn readable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[cfg(not(unix))]
pub(crate) fn writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_allows_ordinary_move() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, "a").unwrap();
        let dest = temp_dir.path().join("b.txt");

        let check = FsPermissionGate.check_file_operation(&source, &dest);
        assert_eq!(check.status, CheckStatus::Ok);
        assert!(check.error.is_none());
    }

    #[test]
    fn test_missing_destination_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.txt");
        fs::write(&source, "a").unwrap();
        let dest = temp_dir.path().join("missing").join("a.txt");

        let check = FsPermissionGate.check_file_operation(&source, &dest);
        assert_eq!(check.status, CheckStatus::Error);
        assert!(check.error.unwrap().contains("doesn't exist"));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let check = FsPermissionGate.check_file_operation(
            &temp_dir.path().join("ghost"),
            &temp_dir.path().join("dest"),
        );
        assert_eq!(check.status, CheckStatus::Error);
    }
}
