// src/fs/mod.rs

//! Filesystem helpers used by the experiment tree, progress store and
//! configuration writer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::Result;

/// Replace `path` with `contents` in one step.
///
/// The data is written to a temporary file in the same directory and then
/// renamed over the target, so readers never observe a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("creating dir {:?}", parent))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("creating temporary file in {:?}", parent))?;
    tmp.write_all(contents)
        .with_context(|| format!("writing temporary file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temporary file for {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temporary file onto {:?}", path))?;
    Ok(())
}

/// Copy `src` to `dst` unless `dst` already exists. Returns whether a copy
/// happened.
pub fn copy_if_absent(src: &Path, dst: &Path) -> Result<bool> {
    if dst.exists() {
        debug!(path = ?dst, "already present; not copied again");
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
    }
    fs::copy(src, dst).with_context(|| format!("copying {:?} -> {:?}", src, dst))?;
    debug!(src = ?src, dst = ?dst, "copied");
    Ok(true)
}

/// Create `link` pointing at `target` unless something already sits at
/// `link`. Returns whether a link was created.
pub fn symlink_if_absent(target: &Path, link: &Path) -> Result<bool> {
    if link.symlink_metadata().is_ok() {
        debug!(link = ?link, "link target already exists; not linked again");
        return Ok(false);
    }
    make_symlink(target, link).with_context(|| format!("linking {:?} -> {:?}", link, target))?;
    Ok(true)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    // No portable symlinks; fall back to a copy of the resolved target.
    let resolved = match link.parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    };
    fs::copy(resolved, link).map(|_| ())
}

/// Recursively copy every file under `src` into `dst`, keeping files that
/// already exist in `dst`. Returns the number of files copied.
pub fn copy_tree_if_absent(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.with_context(|| format!("walking {:?}", src))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativising {:?}", entry.path()))?;
        if copy_if_absent(entry.path(), &dst.join(rel))? {
            copied += 1;
        }
    }
    Ok(copied)
}

/// Read a one-line text file and return its trimmed contents.
pub fn read_single_line(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))?;
    Ok(text.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/progress.toml");
        write_atomic(&path, b"DTG = \"2024010100\"\n").unwrap();
        write_atomic(&path, b"DTG = \"2024010103\"\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "DTG = \"2024010103\"\n");
    }

    #[test]
    fn copy_if_absent_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();

        assert!(!copy_if_absent(&src, &dst).unwrap());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "old");
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::create_dir_all(src.join("b")).unwrap();
        fs::write(src.join("b/c.json"), "{}").unwrap();
        fs::write(src.join("d.json"), "{}").unwrap();

        let dst = dir.path().join("z");
        assert_eq!(copy_tree_if_absent(&src, &dst).unwrap(), 2);
        assert!(dst.join("b/c.json").is_file());
        assert_eq!(copy_tree_if_absent(&src, &dst).unwrap(), 0);
    }
}
