//! Aggregate progress of a campaign's background jobs.

use super::ChangesetJob;

/// Derived state of a background process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The process was canceled.
    Canceled,
    /// Work remains pending.
    Processing,
    /// All work finished without errors.
    Completed,
    /// All work finished and at least one item failed.
    Errored,
}

impl ProcessState {
    /// Returns the canonical API representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Canceled => "CANCELED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Errored => "ERRORED",
        }
    }
}

/// Counts over a campaign's jobs and the state derived from them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundProcessStatus {
    /// Whether the process was canceled. Campaign jobs are never canceled,
    /// so stores always report `false`.
    pub canceled: bool,
    /// Number of jobs.
    pub total: i64,
    /// Jobs without a finishing timestamp.
    pub pending: i64,
    /// Jobs with a finishing timestamp.
    pub completed: i64,
    /// Non-empty error messages of finished jobs.
    pub process_errors: Vec<String>,
}

impl BackgroundProcessStatus {
    /// Aggregates a set of jobs.
    #[must_use]
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a ChangesetJob>) -> Self {
        jobs.into_iter().fold(Self::default(), |mut status, job| {
            status.total += 1;
            if job.is_finished() {
                status.completed += 1;
            } else {
                status.pending += 1;
            }
            if let Some(message) = job.failure() {
                status.process_errors.push(message.to_owned());
            }
            status
        })
    }

    /// Derives the process state.
    ///
    /// Precedence: canceled, then processing while anything is pending,
    /// then completed or errored depending on recorded errors.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.canceled {
            ProcessState::Canceled
        } else if self.pending > 0 {
            ProcessState::Processing
        } else if self.completed == self.total && !self.process_errors.is_empty() {
            ProcessState::Errored
        } else {
            ProcessState::Completed
        }
    }

    /// Returns `true` once no job is pending.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.pending == 0
    }
}
