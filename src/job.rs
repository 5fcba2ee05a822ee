//! Conversion job state machine, registry, and cancellation.
//!
//! Each conversion runs as one independent background unit of work. The
//! registry keeps a per-job lock so concurrent jobs updating their own records
//! never contend; the outer map lock is only held for insert/lookup. Phase
//! changes go through [`ConversionJob::advance`], which rejects illegal
//! transitions, and progress is clamped monotonically non-decreasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Phase of the conversion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Extracting,
    Merging,
    Converting,
    Completed,
    Failed,
}

impl Phase {
    /// Whether `self -> next` is a legal edge of the state machine.
    ///
    /// `Merging` only occurs in merge mode; every non-terminal phase may fail.
    pub fn can_transition(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Pending, Extracting) => true,
            (Extracting, Merging) | (Extracting, Converting) => true,
            (Merging, Converting) => true,
            (Converting, Completed) => true,
            (Pending | Extracting | Merging | Converting, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::Extracting => "extracting",
            Phase::Merging => "merging",
            Phase::Converting => "converting",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Mutable record of one conversion job, polled by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub job_id: Uuid,
    pub session_id: String,
    pub phase: Phase,
    /// Percentage complete (0-100), monotonically non-decreasing.
    pub progress: f32,
    /// Human-readable label of the file/phase being worked on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// Number of output packages the job produced (or will produce).
    pub split_count: usize,
    pub output_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            session_id: session_id.into(),
            phase: Phase::Pending,
            progress: 0.0,
            current_file: None,
            split_count: 1,
            output_files: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves the job to `next`, rejecting illegal phase jumps.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition(next) {
            return Err(Error::PhaseTransition(self.phase, next));
        }
        self.phase = next;
        Ok(())
    }

    /// Raises progress to `value`; values below the current progress are
    /// ignored so progress never moves backwards.
    pub fn set_progress(&mut self, value: f32) {
        if value > self.progress {
            self.progress = value.min(100.0);
        }
    }

    /// Marks the job completed with its produced output filenames.
    pub fn complete(&mut self, output_files: Vec<String>) -> Result<()> {
        self.advance(Phase::Completed)?;
        self.output_files = output_files;
        self.progress = 100.0;
        self.current_file = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the job failed, recording the error message. Terminal jobs are
    /// left untouched so a completed job is never resurrected into failure.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = Phase::Failed;
        self.error = Some(error.into());
        self.current_file = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Cooperative cancellation flag, checked between phases and before each
/// page transform.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` once the token has been triggered.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct JobEntry {
    job: Arc<RwLock<ConversionJob>>,
    cancel: CancelToken,
}

/// Concurrent job table with per-entry synchronization.
///
/// The outer lock is held only long enough to clone the per-job handle, so
/// jobs mutating their own records do not block each other and status polls
/// stay cheap.
#[derive(Clone, Default)]
pub struct JobRegistry {
    entries: Arc<RwLock<HashMap<Uuid, Arc<JobEntry>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job, returning its id and cancel token.
    pub fn insert(&self, job: ConversionJob) -> (Uuid, CancelToken) {
        let id = job.job_id;
        let cancel = CancelToken::new();
        let entry = Arc::new(JobEntry {
            job: Arc::new(RwLock::new(job)),
            cancel: cancel.clone(),
        });
        self.entries
            .write()
            .expect("job registry lock poisoned")
            .insert(id, entry);
        (id, cancel)
    }

    fn entry(&self, id: Uuid) -> Option<Arc<JobEntry>> {
        self.entries
            .read()
            .expect("job registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Snapshot of a job record.
    pub fn get(&self, id: Uuid) -> Option<ConversionJob> {
        self.entry(id)
            .map(|e| e.job.read().expect("job lock poisoned").clone())
    }

    /// Applies a partial-field mutation to one job record.
    pub fn update<F>(&self, id: Uuid, f: F) -> Option<ConversionJob>
    where
        F: FnOnce(&mut ConversionJob),
    {
        let entry = self.entry(id)?;
        let mut job = entry.job.write().expect("job lock poisoned");
        f(&mut job);
        Some(job.clone())
    }

    /// Triggers cooperative cancellation for a job. Returns `false` for
    /// unknown or already-terminal jobs.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.entry(id) {
            Some(entry) => {
                let terminal = entry.job.read().expect("job lock poisoned").is_terminal();
                if terminal {
                    false
                } else {
                    entry.cancel.cancel();
                    true
                }
            }
            None => false,
        }
    }

    /// Snapshots of all known jobs.
    pub fn list(&self) -> Vec<ConversionJob> {
        let entries: Vec<Arc<JobEntry>> = self
            .entries
            .read()
            .expect("job registry lock poisoned")
            .values()
            .cloned()
            .collect();
        entries
            .iter()
            .map(|e| e.job.read().expect("job lock poisoned").clone())
            .collect()
    }

    /// Snapshots of jobs belonging to one session.
    pub fn list_for_session(&self, session_id: &str) -> Vec<ConversionJob> {
        self.list()
            .into_iter()
            .filter(|j| j.session_id == session_id)
            .collect()
    }

    /// Removes terminal jobs whose completion is older than `max_age`.
    pub fn cleanup(&self, max_age: std::time::Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        self.entries
            .write()
            .expect("job registry lock poisoned")
            .retain(|_, entry| {
                let job = entry.job.read().expect("job lock poisoned");
                match (job.is_terminal(), job.completed_at) {
                    (true, Some(completed_at)) => completed_at > cutoff,
                    _ => true,
                }
            });
    }
}
