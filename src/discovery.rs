//! Recursive discovery of message files under a source folder.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::DiscoveryConfig;
use crate::error::{ConvertError, Result};

/// Collect all message files under `root`, sorted by their path string.
///
/// Directories whose name starts with `skip_dir_prefix` (case-insensitive),
/// such as Apple Mail's `Attachments` caches, are not descended into.
/// Unreadable subdirectories are logged and skipped.
pub fn collect_message_paths(root: &Path, options: &DiscoveryConfig) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(ConvertError::SourceNotFound(root.to_path_buf()));
    }

    let extension = options.extension.trim_start_matches('.').to_lowercase();
    let skip_prefix = options.skip_dir_prefix.to_lowercase();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry, &skip_prefix));

    let mut paths = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_extension(entry.path(), &extension) {
            paths.push(entry.into_path());
        }
    }

    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    debug!(root = %root.display(), count = paths.len(), "Discovered message files");
    Ok(paths)
}

fn is_skipped_dir(entry: &DirEntry, skip_prefix: &str) -> bool {
    !skip_prefix.is_empty()
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_string_lossy()
            .to_lowercase()
            .starts_with(skip_prefix)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.file_name()
        .map(|name| {
            name.to_string_lossy()
                .to_lowercase()
                .ends_with(&format!(".{extension}"))
        })
        .unwrap_or(false)
}
