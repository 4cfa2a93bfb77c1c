//! Local directory source for cameras that upload snapshots over FTP/SMB.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use motionwatch_mime::message::has_image_extension;

use super::{Source, SourceSession};
use crate::model::{AckMode, ItemFilter, ItemId, Payload, PayloadRef, SourceItem};
use crate::{Error, Result};

/// Sub-directory that acknowledged files are moved into.
pub const PROCESSED_DIR: &str = "processed";

/// Watches one directory for JPEG and PNG files.
#[derive(Debug, Clone)]
pub struct FolderSource {
    dir: PathBuf,
}

impl FolderSource {
    /// Creates a source for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Source for FolderSource {
    type Session = FolderSession;

    async fn connect(&self) -> Result<FolderSession> {
        let meta = tokio::fs::metadata(&self.dir).await.map_err(|e| {
            Error::Connection(format!("cannot open {}: {e}", self.dir.display()))
        })?;
        if !meta.is_dir() {
            return Err(Error::Connection(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        Ok(FolderSession {
            dir: self.dir.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("folder://{}", self.dir.display())
    }
}

/// Session over a directory. Holds no open handles.
#[derive(Debug)]
pub struct FolderSession {
    dir: PathBuf,
}

#[async_trait]
impl SourceSession for FolderSession {
    async fn list(&mut self, filter: &ItemFilter) -> Result<Vec<SourceItem>> {
        let since = filter.since(Utc::now());
        let mut items = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !has_image_extension(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = meta.modified()?.into();
            if modified < since {
                continue;
            }
            items.push(SourceItem {
                id: ItemId::new(format!("{name}@{}", modified.timestamp_millis())),
                locator: entry.path().to_string_lossy().into_owned(),
                received_at: modified,
                payload_refs: vec![PayloadRef {
                    filename: name.clone(),
                    size: meta.len(),
                }],
                subject: name,
            });
        }

        Ok(items)
    }

    async fn fetch(&mut self, item: &SourceItem) -> Result<Vec<Payload>> {
        let path = Path::new(&item.locator);
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::Decode(format!("{} is missing", path.display())));
            }
            // A single unreadable file says nothing about the directory.
            Err(e) => {
                return Err(Error::Decode(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(item
            .payload_refs
            .iter()
            .take(1)
            .map(|r| Payload {
                filename: r.filename.clone(),
                content_type: content_type_for(&r.filename).map(str::to_string),
                expected_size: Some(r.size),
                data: data.clone(),
            })
            .collect())
    }

    async fn acknowledge(&mut self, item: &SourceItem, mode: AckMode) -> Result<()> {
        let path = Path::new(&item.locator);
        let result = match mode {
            AckMode::Delete => tokio::fs::remove_file(path).await,
            AckMode::MarkSeen => {
                let processed = self.dir.join(PROCESSED_DIR);
                match tokio::fs::create_dir_all(&processed).await {
                    Ok(()) => {
                        let target =
                            processed.join(path.file_name().unwrap_or(path.as_os_str()));
                        tokio::fs::rename(path, target).await
                    }
                    Err(e) => Err(e),
                }
            }
        };
        match result {
            Ok(()) => Ok(()),
            // Already gone: a previous cycle acknowledged it.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            // Per-file failures are item-level; the session stays usable.
            Err(e) => Err(Error::Source(format!(
                "cannot acknowledge {}: {e}",
                path.display()
            ))),
        }
    }

    async fn disconnect(self) -> Result<()> {
        Ok(())
    }
}

fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn filter() -> ItemFilter {
        ItemFilter {
            lookback: Duration::from_secs(3600),
            keyword: Some("ignored".into()),
            unseen_only: false,
        }
    }

    #[tokio::test]
    async fn test_lists_only_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let mut session = FolderSource::new(dir.path()).connect().await.unwrap();
        let mut items = session.list(&filter()).await.unwrap();
        items.sort_by(|a, b| a.subject.cmp(&b.subject));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].subject, "a.jpg");
        assert!(items[0].id.as_str().starts_with("a.jpg@"));
        assert_eq!(items[0].payload_refs[0].size, 4);
    }

    #[tokio::test]
    async fn test_fetch_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();
        let mut session = FolderSource::new(dir.path()).connect().await.unwrap();
        let item = session.list(&filter()).await.unwrap().remove(0);

        let payloads = session.fetch(&item).await.unwrap();
        assert_eq!(payloads[0].data, b"jpeg");
        assert_eq!(payloads[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(payloads[0].expected_size, Some(4));

        std::fs::remove_file(dir.path().join("a.jpg")).unwrap();
        let err = session.fetch(&item).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_modes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"2").unwrap();
        let mut session = FolderSource::new(dir.path()).connect().await.unwrap();
        let mut items = session.list(&filter()).await.unwrap();
        items.sort_by(|a, b| a.subject.cmp(&b.subject));

        session.acknowledge(&items[0], AckMode::Delete).await.unwrap();
        assert!(!dir.path().join("a.jpg").exists());
        session.acknowledge(&items[0], AckMode::Delete).await.unwrap();

        session.acknowledge(&items[1], AckMode::MarkSeen).await.unwrap();
        assert!(dir.path().join(PROCESSED_DIR).join("b.jpg").exists());
        assert!(session.list(&filter()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_move_is_item_level_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"1").unwrap();
        let blocker = dir.path().join(PROCESSED_DIR).join("a.png");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let mut session = FolderSource::new(dir.path()).connect().await.unwrap();
        let item = session.list(&filter()).await.unwrap().remove(0);
        let err = session
            .acknowledge(&item, AckMode::MarkSeen)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Source(_)));
        assert!(!err.is_connection_level());
        assert!(dir.path().join("a.png").exists());
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where a file was listed fails the read, not the session.
        std::fs::create_dir(dir.path().join("x.jpg")).unwrap();
        let item = SourceItem {
            id: ItemId::new("x.jpg@0"),
            locator: dir.path().join("x.jpg").to_string_lossy().into_owned(),
            received_at: Utc::now(),
            payload_refs: vec![PayloadRef {
                filename: "x.jpg".into(),
                size: 0,
            }],
            subject: "x.jpg".into(),
        };

        let mut session = FolderSource::new(dir.path()).connect().await.unwrap();
        let err = session.fetch(&item).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(!err.is_connection_level());
    }

    #[tokio::test]
    async fn test_missing_directory_is_connection_error() {
        let err = FolderSource::new("/nonexistent/motionwatch")
            .connect()
            .await
            .unwrap_err();
        assert!(err.is_connection_level());
    }
}
