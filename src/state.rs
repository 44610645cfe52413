use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to replace state file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unsupported state file version: {0}")]
    InvalidVersion(u32),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Identifies one pollable stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub log_group_name: String,
    pub log_stream_name: String,
}

impl StreamKey {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            log_group_name: group.into(),
            log_stream_name: stream.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.log_group_name, self.log_stream_name)
    }
}

/// Where to resume reading a stream. A forward token, when present, wins
/// over the timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPosition {
    #[serde(default)]
    pub next_forward_token: Option<String>,
    #[serde(default)]
    pub last_seen_timestamp_ms: Option<i64>,
}

impl ReadPosition {
    pub fn is_empty(&self) -> bool {
        self.next_forward_token.is_none() && self.last_seen_timestamp_ms.is_none()
    }
}

/// On-disk layout of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub streams: Vec<StreamEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    #[serde(flatten)]
    pub key: StreamKey,
    #[serde(flatten)]
    pub position: ReadPosition,
}

/// Read positions for every stream seen so far, backed by one JSON file.
///
/// `set` only updates memory; nothing is durable until `save`. Entries are
/// never removed.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    positions: BTreeMap<StreamKey, ReadPosition>,
}

impl StateStore {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: BTreeMap::new(),
        }
    }

    /// Load state from `path`, falling back to empty state when the file is
    /// missing, unreadable or from another version.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        match Self::try_load(&path).await {
            Ok(Some(store)) => {
                info!(
                    path = %path.display(),
                    streams = store.positions.len(),
                    "Loaded state file"
                );
                store
            }
            Ok(None) => {
                info!(path = %path.display(), "No state file found, starting fresh");
                Self::empty(path)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load state file, starting fresh"
                );
                Self::empty(path)
            }
        }
    }

    /// Strict variant of [`StateStore::load`]. `Ok(None)` means no file.
    pub async fn try_load(path: &Path) -> Result<Option<Self>> {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: StateFile = serde_json::from_slice(&contents)?;
        if file.version != CURRENT_VERSION {
            return Err(StateError::InvalidVersion(file.version));
        }

        let positions = file
            .streams
            .into_iter()
            .map(|entry| (entry.key, entry.position))
            .collect();

        Ok(Some(Self {
            path: path.to_path_buf(),
            positions,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &StreamKey) -> ReadPosition {
        self.positions.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, key: StreamKey, position: ReadPosition) {
        self.positions.insert(key, position);
    }

    /// Record a stream as seen. Returns true if it was not known before.
    pub fn register(&mut self, key: &StreamKey) -> bool {
        if self.positions.contains_key(key) {
            return false;
        }
        self.positions.insert(key.clone(), ReadPosition::default());
        true
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn snapshot(&self) -> StateFile {
        StateFile {
            version: CURRENT_VERSION,
            updated_at: Utc::now(),
            streams: self
                .positions
                .iter()
                .map(|(key, position)| StreamEntry {
                    key: key.clone(),
                    position: position.clone(),
                })
                .collect(),
        }
    }

    /// Atomically replace the state file with the current positions.
    pub async fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes)).await??;

        debug!(
            path = %self.path.display(),
            streams = self.positions.len(),
            "State file saved"
        );
        Ok(())
    }
}

/// Write to a temp file in the target directory, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(stream: &str) -> StreamKey {
        StreamKey::new("group", stream)
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::empty(&path);
        store.set(
            key("a"),
            ReadPosition {
                next_forward_token: Some("f/12".to_string()),
                last_seen_timestamp_ms: Some(1_700_000_000_000),
            },
        );
        store.register(&key("b"));
        store.save().await.unwrap();

        let loaded = StateStore::load(&path).await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get(&key("a")).next_forward_token.as_deref(),
            Some("f/12")
        );
        assert!(loaded.get(&key("b")).is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(dir.path().join("missing.json")).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            StateStore::try_load(&path).await,
            Err(StateError::Json(_))
        ));
        assert!(StateStore::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version": 999, "updated_at": "2025-01-01T00:00:00Z", "streams": []}"#,
        )
        .unwrap();

        assert!(matches!(
            StateStore::try_load(&path).await,
            Err(StateError::InvalidVersion(999))
        ));
        assert!(StateStore::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_file_is_human_readable_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/state.json");

        let mut store = StateStore::empty(&path);
        store.set(
            key("app"),
            ReadPosition {
                next_forward_token: None,
                last_seen_timestamp_ms: Some(42),
            },
        );
        store.save().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["streams"][0]["log_group_name"], "group");
        assert_eq!(value["streams"][0]["log_stream_name"], "app");
        assert_eq!(value["streams"][0]["last_seen_timestamp_ms"], 42);

        // Only the state file remains; the temp file was renamed over it.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut store = StateStore::empty("/tmp/unused.json");
        assert!(store.register(&key("a")));
        store.set(
            key("a"),
            ReadPosition {
                next_forward_token: Some("t".to_string()),
                last_seen_timestamp_ms: None,
            },
        );
        assert!(!store.register(&key("a")));
        assert_eq!(store.get(&key("a")).next_forward_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_unknown_stream_has_empty_position() {
        let store = StateStore::empty("/tmp/unused.json");
        assert_eq!(store.get(&key("never")), ReadPosition::default());
    }
}
