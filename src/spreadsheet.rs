#![forbid(unsafe_code)]

//! CSV spreadsheet holding one row per scraped upload.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, TimeZone};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::listing::VideoRecord;

const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BVID_COLUMN: &str = "bvid";

/// Same columns as [`VideoRecord`], with `created` rendered as local time.
#[derive(Serialize)]
struct SpreadsheetRow<'a> {
    title: &'a str,
    description: &'a str,
    play: i64,
    comment: i64,
    author: &'a str,
    created: String,
    length: &'a str,
    video_review: i64,
    bvid: &'a str,
    aid: i64,
    pic: &'a str,
    mid: i64,
}

impl<'a> From<&'a VideoRecord> for SpreadsheetRow<'a> {
    fn from(video: &'a VideoRecord) -> Self {
        Self {
            title: &video.title,
            description: &video.description,
            play: video.play,
            comment: video.comment,
            author: &video.author,
            created: format_created(video.created),
            length: &video.length,
            video_review: video.video_review,
            bvid: &video.bvid,
            aid: video.aid,
            pic: &video.pic,
            mid: video.mid,
        }
    }
}

pub fn format_created(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|time| time.format(CREATED_FORMAT).to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Replaces `path` with a fresh spreadsheet containing `videos`.
pub fn write_records(path: &Path, videos: &[VideoRecord]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temporary file in {}", parent.display()))?;
    let mut writer = csv::Writer::from_writer(tmp.as_file());
    if videos.is_empty() {
        writer.write_record(COLUMNS)?;
    }
    for video in videos {
        writer
            .serialize(SpreadsheetRow::from(video))
            .with_context(|| format!("writing row for {}", video.bvid))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    drop(writer);

    tmp.persist(path)
        .with_context(|| format!("saving {}", path.display()))?;
    Ok(())
}

/// Header row used when there are no records to infer it from.
const COLUMNS: [&str; 12] = [
    "title",
    "description",
    "play",
    "comment",
    "author",
    "created",
    "length",
    "video_review",
    "bvid",
    "aid",
    "pic",
    "mid",
];

/// Reads the `bvid` column, skipping blank cells.
pub fn read_bvids(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let column = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .position(|header| header.trim() == BVID_COLUMN)
        .ok_or_else(|| anyhow!("{} has no {BVID_COLUMN} column", path.display()))?;

    let mut bvids = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        if let Some(bvid) = record.get(column).map(str::trim)
            && !bvid.is_empty()
        {
            bvids.push(bvid.to_string());
        }
    }
    Ok(bvids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn video(bvid: &str, title: &str) -> VideoRecord {
        VideoRecord {
            title: title.into(),
            description: "line one\nline two, with comma".into(),
            play: 1234,
            comment: 5,
            author: "uploader".into(),
            created: 1700000000,
            length: "12:34".into(),
            video_review: 7,
            bvid: bvid.into(),
            aid: 99,
            pic: "http://i0.hdslb.com/bfs/archive/a.jpg".into(),
            mid: 356010767,
        }
    }

    #[test]
    fn written_sheet_has_columns_in_record_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("videos.csv");
        write_records(&path, &[video("BV1aa", "first")])?;

        let content = fs::read_to_string(&path)?;
        let header = content.lines().next().unwrap();
        assert_eq!(header, COLUMNS.join(","));
        assert!(content.contains(&format_created(1700000000)));
        Ok(())
    }

    #[test]
    fn bvids_survive_a_write_read_cycle() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("videos.csv");
        write_records(
            &path,
            &[video("BV1aa", "first"), video("BV1bb", "second, \"quoted\"")],
        )?;
        assert_eq!(read_bvids(&path)?, vec!["BV1aa", "BV1bb"]);
        Ok(())
    }

    #[test]
    fn rewriting_replaces_previous_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("videos.csv");
        write_records(&path, &[video("BV1aa", "first")])?;
        write_records(&path, &[video("BV1cc", "third")])?;
        assert_eq!(read_bvids(&path)?, vec!["BV1cc"]);
        Ok(())
    }

    #[test]
    fn empty_sheet_still_has_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("videos.csv");
        write_records(&path, &[])?;
        assert!(read_bvids(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn read_bvids_requires_column() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("other.csv");
        fs::write(&path, "title,aid\nx,1\n")?;
        let err = read_bvids(&path).unwrap_err();
        assert!(err.to_string().contains("no bvid column"));
        Ok(())
    }

    #[test]
    fn read_bvids_skips_blank_cells() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.csv");
        fs::write(&path, "bvid,title\nBV1aa,a\n ,b\nBV1bb,c\n")?;
        assert_eq!(read_bvids(&path)?, vec!["BV1aa", "BV1bb"]);
        Ok(())
    }
}
