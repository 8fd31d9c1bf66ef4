//! Path normalization for user-supplied source and output paths.
//!
//! `~` and `$VAR` / `${VAR}` are expanded first (unknown variables are kept
//! as literal text), then the path is made
//! absolute and symlinks are resolved. Paths that do not exist yet (the
//! output archive on a first run) are resolved through their nearest
//! existing ancestor.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{ConvertError, Result};

/// Expand, absolutize and canonicalize a user-supplied path.
pub fn normalize(raw: impl AsRef<Path>) -> Result<PathBuf> {
    let expanded = expand(raw.as_ref())?;
    let absolute = absolutize(&expanded)?;
    let resolved = resolve_existing_prefix(&absolute);
    debug!(input = %raw.as_ref().display(), resolved = %resolved.display(), "Normalized path");
    Ok(resolved)
}

/// Expand `~` and environment variables.
fn expand(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| ConvertError::InvalidPath(format!("{path:?} is not valid UTF-8")))?;
    let home = || dirs::home_dir().map(|home| home.to_string_lossy().into_owned());
    let expanded =
        shellexpand::full_with_context_no_errors(path_str, home, |var| std::env::var(var).ok());
    Ok(PathBuf::from(expanded.as_ref()))
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| ConvertError::io(".", e))?;
    Ok(cwd.join(path))
}

/// Canonicalize the longest existing ancestor and re-append the rest.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut tail: Vec<Component<'_>> = Vec::new();
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(last) = current.components().next_back() {
            tail.push(last);
        }
        if let Ok(canonical) = parent.canonicalize() {
            return rebuild(canonical, &tail);
        }
        current = parent;
    }

    path.to_path_buf()
}

/// Append `tail` (stored innermost-first) to `base`, folding `.` and `..`.
fn rebuild(mut base: PathBuf, tail: &[Component<'_>]) -> PathBuf {
    for component in tail.iter().rev() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other.as_os_str()),
        }
    }
    base
}
