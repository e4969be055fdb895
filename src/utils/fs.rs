//! File system utilities.

use crate::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Marker embedded in temporary copy names.
pub const TEMP_MARKER: &str = ".balancer-tmp-";

/// Check if a path exists and is a directory.
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(crate::Error::io_failure(format!(
            "Path not found: {}",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(crate::Error::io_failure(format!(
            "Not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Temporary sibling of `dest` used while a copy is unverified.
///
/// Lives in the same directory so the final rename stays on one filesystem.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let temp_name = format!(".{}{}{}", name, TEMP_MARKER, uuid::Uuid::new_v4().simple());
    match dest.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// Whether a path names a temporary copy.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(TEMP_MARKER))
        .unwrap_or(false)
}

/// Expand a path pattern whose last component may contain one `*`.
///
/// Enough for mount patterns such as `/mnt/disk*`; results are sorted.
pub fn expand_pattern(pattern: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(name)) = (pattern.parent(), pattern.file_name()) else {
        return Vec::new();
    };
    let name = name.to_string_lossy();
    let Some((prefix, suffix)) = name.split_once('*') else {
        return if pattern.exists() {
            vec![pattern.to_path_buf()]
        } else {
            Vec::new()
        };
    };

    let mut matches: Vec<PathBuf> = WalkDir::new(parent)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let candidate = e.file_name().to_string_lossy();
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        })
        .map(|e| e.into_path())
        .collect();
    matches.sort();
    matches
}

/// Temporary copies left directly inside `dir`.
pub fn find_temp_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_temp_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Temporary copies anywhere below `root`.
pub fn find_temp_files_below(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_temp_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Regular files below `root`, sorted, as paths relative to `root`.
pub fn list_files_relative(root: &Path) -> Result<Vec<PathBuf>> {
    ensure_directory(root)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            crate::Error::io_failure(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() || is_temp_file(entry.path()) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// Total size in bytes of a file or of every file below a directory.
pub fn total_size(path: &Path) -> u64 {
    if path.is_file() {
        return std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Remove empty directories below and including `root`, deepest first.
pub fn remove_empty_dirs(root: &Path) -> usize {
    let mut removed = 0;
    let dirs: Vec<PathBuf> = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    for dir in dirs {
        // remove_dir only succeeds on empty directories
        if std::fs::remove_dir(&dir).is_ok() {
            tracing::debug!("Removed empty directory: {:?}", dir);
            removed += 1;
        }
    }
    removed
}
