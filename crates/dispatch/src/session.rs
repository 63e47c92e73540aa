use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use callrun_core::{CallRunError, Result, RowRef, RunTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Finalizing,
}

/// A slice the endpoint accepted whose row marks may not be written yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAck {
    pub start: usize,
    pub len: usize,
    pub batch_time: String,
}

/// Persisted progress of one dispatch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub run_id: Uuid,
    pub source_tab: String,
    pub run_number: u8,
    pub total_to_send: usize,
    pub tasks: Vec<RunTask>,
    pub rows_used: Vec<RowRef>,
    pub processed_count: usize,
    pub ok_count: usize,
    pub fail_count: usize,
    pub started_at: DateTime<Utc>,
    pub last_progress_at: DateTime<Utc>,
    pub user: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub pending_ack: Option<PendingAck>,
}

impl RunSession {
    pub fn new(
        source_tab: &str,
        run_number: u8,
        tasks: Vec<RunTask>,
        rows_used: Vec<RowRef>,
        user: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_tab: source_tab.to_string(),
            run_number,
            total_to_send: tasks.len(),
            tasks,
            rows_used,
            processed_count: 0,
            ok_count: 0,
            fail_count: 0,
            started_at: now,
            last_progress_at: now,
            user,
            status: SessionStatus::Running,
            pending_ack: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.total_to_send.saturating_sub(self.processed_count)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0 && self.pending_ack.is_none()
    }

    /// Running, but no progress for longer than `max_idle`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        self.status == SessionStatus::Running && now - self.last_progress_at > max_idle
    }
}

/// Run sessions keyed by run id, persisted as one JSON map when a path is set.
///
/// A file-backed store keeps no cache: every call takes an exclusive lock on
/// `<path>.lock`, reloads the map and writes it back if it changed. A `serve`
/// process and a one-shot CLI command therefore see each other's sessions.
pub struct SessionStore {
    path: Option<PathBuf>,
    memory: Mutex<HashMap<Uuid, RunSession>>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Open the store at `path`; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: Some(path.into()),
            memory: Mutex::new(HashMap::new()),
        };
        let count = store.with_sessions(|sessions| Ok((sessions.len(), false)))?;
        if count > 0 {
            if let Some(path) = &store.path {
                info!(count, path = %path.display(), "Loaded run sessions");
            }
        }
        Ok(store)
    }

    /// Run `f` over the current map. `f` returns whether it changed the map.
    fn with_sessions<R>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, RunSession>) -> Result<(R, bool)>,
    ) -> Result<R> {
        let Some(path) = &self.path else {
            let mut sessions = self
                .memory
                .lock()
                .map_err(|_| CallRunError::Other("session store lock poisoned".into()))?;
            return f(&mut sessions).map(|(out, _)| out);
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path.with_extension("lock"))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;

        let mut sessions: HashMap<Uuid, RunSession> = match std::fs::read_to_string(path) {
            Ok(json) if json.trim().is_empty() => HashMap::new(),
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let (out, dirty) = f(&mut sessions)?;
        if dirty {
            let json = serde_json::to_string_pretty(&sessions)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, path)?;
        }
        Ok(out)
    }

    /// Persist a new session, unless another one is already running.
    pub fn begin(&self, session: &RunSession) -> Result<()> {
        self.with_sessions(|sessions| {
            if let Some(other) = oldest_running(sessions) {
                return Err(CallRunError::ConcurrencyConflict(format!(
                    "Run {} is still sending ({} of {}). Please wait.",
                    other.run_number, other.processed_count, other.total_to_send
                )));
            }
            sessions.insert(session.run_id, session.clone());
            Ok(((), true))
        })
    }

    /// Overwrite an existing session. Fails with `FatalRun` when the session
    /// is gone, which means it was cancelled elsewhere.
    pub fn save(&self, session: &RunSession) -> Result<()> {
        self.with_sessions(|sessions| match sessions.get_mut(&session.run_id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(((), true))
            }
            None => Err(CallRunError::FatalRun(format!(
                "run {} was cancelled",
                session.run_id
            ))),
        })
    }

    pub fn get(&self, run_id: Uuid) -> Result<Option<RunSession>> {
        self.with_sessions(|sessions| Ok((sessions.get(&run_id).cloned(), false)))
    }

    pub fn remove(&self, run_id: Uuid) -> Result<Option<RunSession>> {
        self.with_sessions(|sessions| {
            let removed = sessions.remove(&run_id);
            let dirty = removed.is_some();
            Ok((removed, dirty))
        })
    }

    /// Remove every session, returning what was dropped.
    pub fn clear(&self) -> Result<Vec<RunSession>> {
        self.with_sessions(|sessions| {
            let mut dropped: Vec<RunSession> = sessions.drain().map(|(_, s)| s).collect();
            dropped.sort_by_key(|s| s.started_at);
            let dirty = !dropped.is_empty();
            Ok((dropped, dirty))
        })
    }

    pub fn list(&self) -> Result<Vec<RunSession>> {
        self.with_sessions(|sessions| {
            let mut all: Vec<RunSession> = sessions.values().cloned().collect();
            all.sort_by_key(|s| s.started_at);
            Ok((all, false))
        })
    }

    /// The oldest running session, if any.
    pub fn active(&self) -> Result<Option<RunSession>> {
        self.with_sessions(|sessions| Ok((oldest_running(sessions).cloned(), false)))
    }

    /// Drop sessions that are stale or were left mid-finalize. Returns their ids.
    pub fn reap(&self, now: DateTime<Utc>, max_idle: Duration) -> Result<Vec<Uuid>> {
        self.with_sessions(|sessions| {
            let dead: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.status == SessionStatus::Finalizing || s.is_stale(now, max_idle))
                .map(|s| s.run_id)
                .collect();
            for id in &dead {
                if let Some(s) = sessions.remove(id) {
                    warn!(
                        run_id = %id,
                        run = s.run_number,
                        processed = s.processed_count,
                        total = s.total_to_send,
                        "Reaped abandoned run session"
                    );
                }
            }
            let dirty = !dead.is_empty();
            Ok((dead, dirty))
        })
    }
}

fn oldest_running(sessions: &HashMap<Uuid, RunSession>) -> Option<&RunSession> {
    sessions
        .values()
        .filter(|s| s.status == SessionStatus::Running)
        .min_by_key(|s| s.started_at)
}
