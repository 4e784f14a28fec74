//! Persistent client state.
//!
//! A single JSON file (`state.json`) holds the session context, the last
//! success/error banner and a short history of recent scans. The file is
//! rewritten after every mutation and removed on logout.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::types::PointageType;

/// Number of recent scans kept in the history.
pub const HISTORY_LIMIT: usize = 5;

/// Longest time a banner stays visible, in seconds.
pub const MAX_BANNER_TTL_SECS: i64 = 3600;

/// File name of the state file inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors raised by [`StateStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The operation needs a logged-in session.
    #[error("no active session")]
    NoSession,

    /// Reading the state file failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// State file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or removing the state file failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// State file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON for [`PersistedState`].
    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        /// State file path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize state: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Tone of a banner message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerKind {
    /// Clocking recorded.
    Success,
    /// Something went wrong.
    Error,
}

/// Timed message shown once on the next screen, then dismissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    /// Success or error.
    pub kind: BannerKind,
    /// Text shown to the operator.
    pub text: String,
    /// Instant after which the banner is no longer shown.
    pub expires_at: DateTime<Utc>,
}

impl Banner {
    /// Create a banner that expires `ttl` after `now`.
    ///
    /// `ttl` is clamped to [`MAX_BANNER_TTL_SECS`].
    #[must_use]
    pub fn new(kind: BannerKind, text: impl Into<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = ttl.min(Duration::seconds(MAX_BANNER_TTL_SECS));
        Self {
            kind,
            text: text.into(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(now),
        }
    }

    /// Whether the banner has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One successful clocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Bus code (`matricule`).
    pub bus_code: String,
    /// Driver code (`conducteur_matricule`).
    pub driver_code: String,
    /// Entry, exit or category.
    pub pointage_type: PointageType,
    /// When the server accepted the clocking.
    pub recorded_at: DateTime<Utc>,
}

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Present while logged in.
    pub session: Option<Session>,
    /// Pending banner, if any.
    pub banner: Option<Banner>,
    /// Most recent first, at most [`HISTORY_LIMIT`] entries.
    pub history: Vec<ScanRecord>,
}

/// File-backed store for [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    state: PersistedState,
}

impl StateStore {
    /// Open the store at `path`, loading existing state if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| {
                StorageError::ReadError {
                    path: path.clone(),
                    source,
                }
            })?;
            serde_json::from_str(&content).map_err(|source| StorageError::ParseError {
                path: path.clone(),
                source,
            })?
        } else {
            PersistedState::default()
        };
        Ok(Self { path, state })
    }

    /// Open `state.json` inside `data_dir`.
    ///
    /// # Errors
    ///
    /// See [`StateStore::open`].
    pub fn in_dir(data_dir: &Path) -> StorageResult<Self> {
        Self::open(data_dir.join(STATE_FILE_NAME))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole state.
    #[must_use]
    pub const fn state(&self) -> &PersistedState {
        &self.state
    }

    /// The stored session, if logged in.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.state.session.as_ref()
    }

    /// Store a new session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn set_session(&mut self, session: Session) -> StorageResult<()> {
        self.state.session = Some(session);
        self.save()
    }

    /// Change the pointage type of the current session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoSession`] when logged out, or a write error.
    pub fn set_pointage_type(&mut self, pointage_type: PointageType) -> StorageResult<()> {
        let session = self.state.session.as_mut().ok_or(StorageError::NoSession)?;
        session.pointage_type = pointage_type;
        self.save()
    }

    /// Recent scans, most recent first.
    #[must_use]
    pub fn history(&self) -> &[ScanRecord] {
        &self.state.history
    }

    /// Prepend a record, dropping the oldest beyond [`HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn push_history(&mut self, record: ScanRecord) -> StorageResult<()> {
        self.state.history.insert(0, record);
        self.state.history.truncate(HISTORY_LIMIT);
        self.save()
    }

    /// Replace the pending banner.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn set_banner(&mut self, banner: Banner) -> StorageResult<()> {
        self.state.banner = Some(banner);
        self.save()
    }

    /// The pending banner if it has not expired at `now`.
    ///
    /// An expired banner is dropped from the state.
    ///
    /// # Errors
    ///
    /// Returns an error if dropping an expired banner cannot be written.
    pub fn active_banner(&mut self, now: DateTime<Utc>) -> StorageResult<Option<Banner>> {
        match &self.state.banner {
            Some(banner) if banner.is_expired(now) => {
                self.state.banner = None;
                self.save()?;
                Ok(None)
            }
            other => Ok(other.clone()),
        }
    }

    /// Forget everything and remove the backing file.
    ///
    /// Safe to call when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.state = PersistedState::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::WriteError {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, content).map_err(|source| StorageError::WriteError {
            path: self.path.clone(),
            source,
        })?;
        tracing::trace!(path = %self.path.display(), "state saved");
        Ok(())
    }
}
