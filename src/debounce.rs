//! Debounce store implementations
//!
//! Both stores keep a single `last_scaled` timestamp, which is the only
//! state the engine owns.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::callbacks::DebounceStore;
use crate::error::QueueScaleResult;

/// Process-local store, for single-process deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryDebounceStore {
    last_scaled: Mutex<Option<DateTime<Utc>>>,
}

impl InMemoryDebounceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing stamp
    pub fn with_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_scaled: Mutex::new(Some(timestamp)),
        }
    }
}

#[async_trait]
impl DebounceStore for InMemoryDebounceStore {
    async fn get(&self) -> QueueScaleResult<Option<DateTime<Utc>>> {
        Ok(*self.last_scaled.lock().await)
    }

    async fn set(&self, timestamp: DateTime<Utc>) -> QueueScaleResult<()> {
        *self.last_scaled.lock().await = Some(timestamp);
        Ok(())
    }

    async fn clear(&self) -> QueueScaleResult<()> {
        *self.last_scaled.lock().await = None;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> QueueScaleResult<bool> {
        let mut last_scaled = self.last_scaled.lock().await;
        if *last_scaled != expected {
            return Ok(false);
        }
        *last_scaled = Some(new);
        Ok(true)
    }
}

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Store backed by a text file holding one RFC 3339 timestamp
///
/// A missing or empty file reads as "never scaled". Stamps are written at
/// nanosecond precision so a value read back compares equal to the one
/// written. Writes go through a per-writer temporary file and a rename.
/// Compare-and-set is atomic only among callers sharing this instance.
#[derive(Debug)]
pub struct FileDebounceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDebounceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> QueueScaleResult<Option<DateTime<Utc>>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let parsed = DateTime::parse_from_rfc3339(trimmed)?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        PathBuf::from(tmp)
    }

    async fn write(&self, timestamp: DateTime<Utc>) -> QueueScaleResult<()> {
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), %timestamp, "Wrote debounce stamp");
        Ok(())
    }
}

#[async_trait]
impl DebounceStore for FileDebounceStore {
    async fn get(&self) -> QueueScaleResult<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn set(&self, timestamp: DateTime<Utc>) -> QueueScaleResult<()> {
        let _guard = self.lock.lock().await;
        self.write(timestamp).await
    }

    async fn clear(&self) -> QueueScaleResult<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn compare_and_set(
        &self,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> QueueScaleResult<bool> {
        let _guard = self.lock.lock().await;
        if self.read().await? != expected {
            return Ok(false);
        }
        self.write(new).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueScaleError;
    use chrono::{Duration, TimeZone};

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn in_memory_starts_empty() {
        let store = InMemoryDebounceStore::new();
        assert_eq!(store.get().await.unwrap(), None);
        store.set(stamp()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(stamp()));
        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_compare_and_set() {
        let store = InMemoryDebounceStore::new();
        let later = stamp() + Duration::seconds(30);

        assert!(store.compare_and_set(None, stamp()).await.unwrap());
        assert!(!store.compare_and_set(None, later).await.unwrap());
        assert_eq!(store.get().await.unwrap(), Some(stamp()));
        assert!(store.compare_and_set(Some(stamp()), later).await.unwrap());
        assert_eq!(store.get().await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn file_store_missing_and_empty_file_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scaled");
        let store = FileDebounceStore::new(&path);
        assert_eq!(store.get().await.unwrap(), None);

        tokio::fs::write(&path, "  \n").await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_round_trips_subsecond_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDebounceStore::new(dir.path().join("last_scaled"));
        let ts = stamp() + Duration::microseconds(250);

        store.set(ts).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(ts));

        let reopened = FileDebounceStore::new(store.path());
        assert_eq!(reopened.get().await.unwrap(), Some(ts));

        reopened.clear().await.unwrap();
        reopened.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_keeps_nanosecond_precision() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDebounceStore::new(dir.path().join("last_scaled"));
        let ts = stamp() + Duration::nanoseconds(123);

        store.set(ts).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(ts));
        assert!(store.compare_and_set(Some(ts), stamp()).await.unwrap());
        assert_eq!(store.get().await.unwrap(), Some(stamp()));
    }

    #[tokio::test]
    async fn file_store_concurrent_writers_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scaled");
        let first = FileDebounceStore::new(&path);
        let second = FileDebounceStore::new(&path);

        for i in 0..20 {
            let (a, b) = tokio::join!(
                first.set(stamp() + Duration::seconds(i)),
                second.set(stamp() + Duration::seconds(i + 100)),
            );
            a.unwrap();
            b.unwrap();
        }

        assert!(first.get().await.unwrap().is_some());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("last_scaled")]);
    }

    #[tokio::test]
    async fn file_store_reads_offset_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scaled");
        tokio::fs::write(&path, "2024-03-01T14:00:00+02:00\n").await.unwrap();

        let store = FileDebounceStore::new(&path);
        assert_eq!(store.get().await.unwrap(), Some(stamp()));
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_scaled");
        tokio::fs::write(&path, "yesterday").await.unwrap();

        let store = FileDebounceStore::new(&path);
        assert!(matches!(
            store.get().await,
            Err(QueueScaleError::Timestamp { .. })
        ));
    }

    #[tokio::test]
    async fn file_store_compare_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDebounceStore::new(dir.path().join("last_scaled"));
        let later = stamp() + Duration::seconds(90);

        assert!(store.compare_and_set(None, stamp()).await.unwrap());
        assert!(!store.compare_and_set(None, later).await.unwrap());
        assert!(store.compare_and_set(Some(stamp()), later).await.unwrap());
        assert_eq!(store.get().await.unwrap(), Some(later));
    }
}
