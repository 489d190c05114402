//! OCR worker service
//!
//! [`flow::TaskFlow`] drives one task through acquire → download → OCR →
//! report → cleanup. [`runner::Worker`] repeats that forever, optionally
//! acquiring the next task while the current one is being recognised.

pub mod files;
pub mod flow;
pub mod runner;

pub use files::WorkFiles;
pub use flow::{AcquiredTask, Acquisition, TaskFlow};
pub use runner::{Worker, run, shutdown_signal};

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::client::ClientError;
use crate::ocr::OcrError;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("failed to write {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("server answered without a task id")]
    MissingTaskId,

    #[error("prefetch task failed: {0}")]
    Prefetch(String),
}

impl FlowError {
    /// Errors the worker loop cannot recover from by cooling down
    pub fn is_fatal(&self) -> bool {
        match self {
            FlowError::Ocr(e) => e.is_fatal(),
            FlowError::Prefetch(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            FlowError::Client(ClientError::Cancelled) | FlowError::Ocr(OcrError::Cancelled)
        )
    }
}

/// Where a cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Acquiring,
    Downloading,
    Processing,
    Reporting,
    Cancelling,
    Done,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Acquiring => "acquiring",
            CycleState::Downloading => "downloading",
            CycleState::Processing => "processing",
            CycleState::Reporting => "reporting",
            CycleState::Cancelling => "cancelling",
            CycleState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Why a cycle ended without work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoWorkAvailable,
    AccessDenied,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A report was built; `reported` is false when sending it failed
    Completed {
        task_id: String,
        valid: bool,
        reported: bool,
    },
    /// The server asked us to wait; the wait has already happened
    WaitedAndSkipped { reason: SkipReason, delay: Duration },
    /// Unexpected failure; the cooldown has already happened
    Faulted { state: CycleState, error: String },
    /// Shutdown interrupted the cycle
    Cancelled { task_id: Option<String> },
}
