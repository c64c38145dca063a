#![forbid(unsafe_code)]

//! Detects which uploads are already on disk and hands the rest to the
//! external downloader, a few at a time.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::user_agent::UserAgentSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStatus {
    pub existing: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Names of the entries directly inside `dir`. A missing directory has none.
fn entry_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("listing {}", dir.display())),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// True when some file or folder in `dir` has `bvid` in its name. A missing
/// `dir` counts as nothing downloaded; other listing errors are returned.
pub fn is_video_downloaded(bvid: &str, dir: &Path) -> Result<bool> {
    Ok(entry_names(dir)?.iter().any(|name| name.contains(bvid)))
}

/// Splits `bvids` by whether they already appear in `dir`, keeping order.
pub fn partition_downloaded(bvids: &[String], dir: &Path) -> Result<DownloadStatus> {
    let names = entry_names(dir)?;
    let (existing, missing): (Vec<String>, Vec<String>) = bvids
        .iter()
        .cloned()
        .partition(|bvid| names.iter().any(|name| name.contains(bvid.as_str())));
    Ok(DownloadStatus { existing, missing })
}

/// Invokes the downloader as `<program> -ua <user agent> <bvid>` from inside
/// `work_dir`.
pub struct Downloader {
    program: PathBuf,
    work_dir: PathBuf,
    user_agents: Arc<dyn UserAgentSource>,
}

impl Downloader {
    pub fn new(
        program: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        user_agents: Arc<dyn UserAgentSource>,
    ) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            user_agents,
        }
    }

    pub async fn download(&self, bvid: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("-ua")
            .arg(self.user_agents.user_agent())
            .arg(bvid)
            .current_dir(&self.work_dir)
            .status()
            .await
            .with_context(|| format!("starting {}", self.program.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", self.program.display());
        }
        Ok(())
    }
}

/// Downloads every id with at most `max_workers` downloader processes alive.
/// Failures are logged and collected; they never stop the batch.
pub async fn download_all(
    downloader: Arc<Downloader>,
    bvids: Vec<String>,
    max_workers: usize,
) -> DownloadSummary {
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for bvid in bvids {
        let permits = Arc::clone(&permits);
        let downloader = Arc::clone(&downloader);
        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => downloader.download(&bvid).await,
                Err(err) => Err(anyhow!(err)),
            };
            (bvid, result)
        });
    }

    let mut summary = DownloadSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((bvid, Ok(()))) => {
                info!("downloaded {bvid}");
                summary.succeeded.push(bvid);
            }
            Ok((bvid, Err(err))) => {
                error!("download failed for {bvid}: {err:#}");
                summary.failed.push(bvid);
            }
            Err(err) => error!("download task aborted: {err}"),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_agent::FixedUserAgent;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn detects_ids_in_file_and_folder_names() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("[BV1aa] first upload.mp4"), "video")?;
        fs::create_dir(dir.path().join("BV1bb"))?;

        assert!(is_video_downloaded("BV1aa", dir.path())?);
        assert!(is_video_downloaded("BV1bb", dir.path())?);
        assert!(!is_video_downloaded("BV1cc", dir.path())?);
        Ok(())
    }

    #[test]
    fn missing_directory_means_nothing_downloaded() -> Result<()> {
        let dir = tempdir()?;
        let absent = dir.path().join("absent");
        assert!(!is_video_downloaded("BV1aa", &absent)?);
        let status = partition_downloaded(&ids(&["BV1aa"]), &absent)?;
        assert_eq!(status.missing, ids(&["BV1aa"]));
        assert!(status.existing.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_directory_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let not_a_dir = dir.path().join("BV1aa.mp4");
        fs::write(&not_a_dir, "video")?;

        assert!(is_video_downloaded("BV1aa", &not_a_dir).is_err());
        assert!(partition_downloaded(&ids(&["BV1aa"]), &not_a_dir).is_err());
        Ok(())
    }

    #[test]
    fn partition_is_stable_across_calls() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("BV1bb.mp4"), "video")?;
        let wanted = ids(&["BV1aa", "BV1bb", "BV1cc"]);

        let first = partition_downloaded(&wanted, dir.path())?;
        let second = partition_downloaded(&wanted, dir.path())?;
        assert_eq!(first, second);
        assert_eq!(first.existing, ids(&["BV1bb"]));
        assert_eq!(first.missing, ids(&["BV1aa", "BV1cc"]));
        Ok(())
    }

    #[cfg(unix)]
    fn install_downloader_stub(dir: &Path) -> Result<PathBuf> {
        let script_path = dir.join("BBDown");
        let script = r#"#!/usr/bin/env bash
set -eu
if [[ "$1" != "-ua" ]]; then
  exit 2
fi
ua="$2"
bvid="$3"
if [[ "$bvid" == *fail* ]]; then
  exit 1
fi
printf '%s\n' "$ua" > "${bvid}.mp4"
"#;
        fs::write(&script_path, script)?;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
        Ok(script_path)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_writes_into_work_dir() -> Result<()> {
        let bin = tempdir()?;
        let work = tempdir()?;
        let stub = install_downloader_stub(bin.path())?;
        let downloader = Downloader::new(
            stub,
            work.path(),
            Arc::new(FixedUserAgent("stub-agent".into())),
        );

        downloader.download("BV1aa").await?;
        let written = fs::read_to_string(work.path().join("BV1aa.mp4"))?;
        assert_eq!(written.trim(), "stub-agent");
        assert!(is_video_downloaded("BV1aa", work.path())?);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failures_do_not_stop_the_batch() -> Result<()> {
        let bin = tempdir()?;
        let work = tempdir()?;
        let stub = install_downloader_stub(bin.path())?;
        let downloader = Arc::new(Downloader::new(
            stub,
            work.path(),
            Arc::new(FixedUserAgent::default()),
        ));

        let mut summary = download_all(
            downloader,
            ids(&["BV1aa", "BV1fail", "BV1bb", "BV1cc"]),
            2,
        )
        .await;
        summary.succeeded.sort();

        assert_eq!(summary.succeeded, ids(&["BV1aa", "BV1bb", "BV1cc"]));
        assert_eq!(summary.failed, ids(&["BV1fail"]));
        let status = partition_downloaded(&ids(&["BV1aa", "BV1bb", "BV1cc"]), work.path())?;
        assert!(status.missing.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_reported_per_id() {
        let work = tempdir().unwrap();
        let downloader = Arc::new(Downloader::new(
            work.path().join("no-such-downloader"),
            work.path(),
            Arc::new(FixedUserAgent::default()),
        ));
        let summary = download_all(downloader, ids(&["BV1aa", "BV1bb"]), 1).await;
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failed.len(), 2);
    }
}
