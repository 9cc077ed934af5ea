//! Bounded page execution.
//!
//! An [`Executor`] takes one batch of [`PageJob`]s and returns one [`Outcome`] per job, in
//! submission order, whatever order the jobs finished in. Two backends share that contract:
//!
//! - [`ThreadExecutor`] runs jobs as tokio tasks in this process
//! - [`ProcessExecutor`] runs jobs in persistent worker processes over the framed protocol in
//!   [`wire`]
//!
//! A failing job never stops its siblings. Once the cancellation token fires no further job is
//! started, and running jobs are expected to stop at their next checkpoint.

pub mod process;
pub mod threads;
pub mod wire;

pub use process::ProcessExecutor;
pub use threads::ThreadExecutor;

use crate::Result;
use crate::core::config::ExecutorMode;
use crate::types::{PageFailure, PageResult, PageUnit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One page of work, as sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageJob {
    pub unit: PageUnit,
    /// Scratch directory owned by this page.
    pub work_dir: PathBuf,
}

/// Per-page work run by an executor.
#[async_trait]
pub trait PageWork: Send + Sync {
    /// Process one page. Page-level problems belong in the returned result; `Err` is reserved
    /// for cancellation and failures that leave no usable result.
    async fn run(&self, job: PageJob, cancel: CancellationToken) -> Result<PageResult>;
}

/// What happened to one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Completed(T),
    Failed(PageFailure),
    /// Started, then stopped at a cancellation checkpoint.
    Cancelled,
    /// Never started because the batch was cancelled first.
    NotStarted,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Map a job's return value onto an outcome.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Completed(value),
            Err(e) if e.is_cancelled() => Outcome::Cancelled,
            Err(e) => Outcome::Failed(PageFailure::from(&e)),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn mode(&self) -> ExecutorMode;

    /// Upper bound on concurrently running jobs.
    fn max_workers(&self) -> usize;

    /// Run every job and return one outcome per job, in submission order.
    async fn submit(&self, jobs: Vec<PageJob>, cancel: &CancellationToken) -> Result<Vec<Outcome<PageResult>>>;
}
