#![forbid(unsafe_code)]

//! Removes leftover folders (e.g. unfinished downloader work dirs) from the
//! download directory before a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use walkdir::WalkDir;

/// Deletes every directory directly inside `dir`, returning what was removed.
/// Plain files are left alone.
pub fn clean_subfolders(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!("download directory {} does not exist, nothing to clean", dir.display());
        return Ok(Vec::new());
    }

    let mut subfolders = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if entry.file_type().is_dir() {
            subfolders.push(entry.into_path());
        }
    }
    subfolders.sort();

    for folder in &subfolders {
        info!("removing subfolder {}", folder.display());
        fs::remove_dir_all(folder).with_context(|| format!("removing {}", folder.display()))?;
    }
    Ok(subfolders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_only_directories() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("BV1aa").join("parts"))?;
        fs::write(dir.path().join("BV1aa").join("parts").join("0.m4s"), "x")?;
        fs::create_dir(dir.path().join("tmp"))?;
        fs::write(dir.path().join("BV1bb.mp4"), "video")?;

        let removed = clean_subfolders(dir.path())?;
        assert_eq!(removed, vec![dir.path().join("BV1aa"), dir.path().join("tmp")]);
        assert!(!dir.path().join("BV1aa").exists());
        assert!(!dir.path().join("tmp").exists());
        assert!(dir.path().join("BV1bb.mp4").exists());
        Ok(())
    }

    #[test]
    fn missing_directory_is_not_an_error() -> Result<()> {
        let dir = tempdir()?;
        assert!(clean_subfolders(&dir.path().join("absent"))?.is_empty());
        Ok(())
    }
}
