//! Host directory snapshots.
//!
//! A [`Directory`] is staged by copying the host tree into a temporary
//! directory, skipping excluded paths, so containers never see (or write to)
//! the live checkout.

use crate::container::Directory;
use crate::error::{EngineError, EngineResult};
use glob::Pattern;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Copy `dir` into a fresh temporary directory.
pub fn stage(dir: &Directory) -> EngineResult<TempDir> {
    let root = dir.host_path.canonicalize().map_err(|e| {
        EngineError::Snapshot(format!("{}: {}", dir.host_path.display(), e))
    })?;
    let patterns = compile(&dir.exclude)?;
    let staged = tempfile::Builder::new().prefix("shipwright-src-").tempdir()?;

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(&root) {
            Ok(relative) => !is_excluded(relative, &patterns),
            Err(_) => true,
        });

    let mut copied = 0usize;
    let mut skipped = 0usize;
    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(&root)
            .map_err(|e| EngineError::Snapshot(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let dest = staged.path().join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest)?;
            copied += 1;
        } else {
            // FIFOs, sockets and device nodes would block or fail fs::copy.
            debug!(path = %relative.display(), "Skipping special file");
            skipped += 1;
        }
    }

    debug!(
        source = %root.display(),
        staged = %staged.path().display(),
        files = copied,
        skipped,
        excluded = dir.exclude.len(),
        "Staged source snapshot"
    );
    Ok(staged)
}

/// Whether a path relative to the snapshot root matches any exclusion.
pub fn is_excluded(relative: &Path, patterns: &[Pattern]) -> bool {
    !relative.as_os_str().is_empty() && patterns.iter().any(|p| p.matches_path(relative))
}

fn compile(patterns: &[String]) -> EngineResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p.trim_end_matches('/')).map_err(EngineError::from))
        .collect()
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> EngineResult<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> EngineResult<()> {
    fs::copy(src, dest)?;
    Ok(())
}
