//! Execution sessions.
//!
//! A session is the resource scope test cases run in: a scratch directory
//! with metadata, whose location is handed to every script process through
//! the environment so that screenshots, traces and downloads from one batch
//! land together. Sessions are explicit handles produced by a
//! [`SessionProvider`]; nothing here is global.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Session id exported to script processes
pub const ENV_SESSION_ID: &str = "WEB_REPLAY_SESSION_ID";

/// Artifact directory exported to script processes
pub const ENV_ARTIFACTS_DIR: &str = "WEB_REPLAY_ARTIFACTS_DIR";

const METADATA_FILE: &str = ".session.json";

/// Sessions left behind by a crashed process are pruned after this long
const STALE_SESSION_AGE: Duration = Duration::from_secs(24 * 60 * 60);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An open execution session
#[derive(Debug)]
pub struct ExecutionSession {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Whether to keep files after the session closes
    pub keep: bool,
}

impl ExecutionSession {
    /// Create a session handle under `base_dir` with a unique ID
    pub fn new(base_dir: &Path) -> Self {
        let id = generate_session_id();
        Self {
            dir: base_dir.join(&id),
            id,
            created_at: Utc::now(),
            keep: false,
        }
    }

    /// Set whether to keep files after the session closes
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Create the session directory and write its metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = serde_json::json!({
            "id": self.id,
            "created": self.created_at.to_rfc3339(),
            "host": host,
            "pid": std::process::id(),
        });

        fs::write(self.dir.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// Directory for one test case's artifacts
    pub fn artifact_dir(&self, test_case_id: &str) -> PathBuf {
        self.dir.join(test_case_id)
    }

    /// Environment handed to a script process running `test_case_id`
    pub fn env_for(&self, test_case_id: &str) -> Vec<(String, String)> {
        vec![
            (ENV_SESSION_ID.to_string(), self.id.clone()),
            (
                ENV_ARTIFACTS_DIR.to_string(),
                self.artifact_dir(test_case_id).to_string_lossy().into_owned(),
            ),
        ]
    }

    /// Remove the session directory unless it is kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Opens and closes execution sessions
pub trait SessionProvider: Send + Sync {
    fn open(&self) -> Result<ExecutionSession>;
    fn close(&self, session: ExecutionSession) -> Result<()>;
}

/// Sessions as directories under a base path
#[derive(Debug, Clone)]
pub struct WorkspaceSessionProvider {
    base_dir: PathBuf,
    keep: bool,
}

impl WorkspaceSessionProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            keep: false,
        }
    }

    /// Keep session directories after close
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl SessionProvider for WorkspaceSessionProvider {
    fn open(&self) -> Result<ExecutionSession> {
        match cleanup_stale_sessions(&self.base_dir, STALE_SESSION_AGE) {
            Ok(0) => {}
            Ok(n) => tracing::info!("Pruned {} stale sessions", n),
            Err(e) => tracing::warn!("Could not prune stale sessions: {}", e),
        }

        let session = ExecutionSession::new(&self.base_dir).keep(self.keep);
        session
            .init()
            .map_err(|e| Error::ResourceLifecycle(format!("cannot create {}: {}", session.dir.display(), e)))?;

        tracing::info!(session = %session.id, "Session opened at {}", session.dir.display());
        Ok(session)
    }

    fn close(&self, session: ExecutionSession) -> Result<()> {
        session
            .cleanup()
            .map_err(|e| Error::ResourceLifecycle(format!("cannot remove {}: {}", session.dir.display(), e)))?;
        tracing::info!(session = %session.id, "Session closed");
        Ok(())
    }
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session_{}_{}_{}", timestamp, std::process::id(), seq)
}

/// Remove session directories under `base` older than `max_age`
pub fn cleanup_stale_sessions(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join(METADATA_FILE).exists() {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
