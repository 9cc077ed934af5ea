//! In-process executor on tokio tasks.

use super::{Executor, Outcome, PageJob, PageWork};
use crate::Result;
use crate::core::config::ExecutorMode;
use crate::error::ErrorClass;
use crate::types::{PageFailure, PageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Runs up to `max_workers` jobs concurrently as tokio tasks.
///
/// Jobs start in submission order: a job is spawned only after it holds a pool slot, so a
/// cancelled batch leaves every later job unstarted.
pub struct ThreadExecutor {
    work: Arc<dyn PageWork>,
    max_workers: usize,
}

impl ThreadExecutor {
    pub fn new(work: Arc<dyn PageWork>, max_workers: usize) -> Self {
        Self {
            work,
            max_workers: max_workers.max(1),
        }
    }
}

#[async_trait]
impl Executor for ThreadExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Threads
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    async fn submit(&self, jobs: Vec<PageJob>, cancel: &CancellationToken) -> Result<Vec<Outcome<PageResult>>> {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::with_capacity(total);

        for (index, job) in jobs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            // The semaphore is never closed.
            let Ok(permit) = permit else { break };

            if cancel.is_cancelled() {
                break;
            }

            let work = Arc::clone(&self.work);
            let token = cancel.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                Outcome::from_result(work.run(job, token).await)
            });
            task_index.insert(handle.id(), index);
        }

        let mut outcomes: Vec<Option<Outcome<PageResult>>> = (0..total).map(|_| None).collect();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&index) = task_index.get(&id) {
                        outcomes[index] = Some(outcome);
                    }
                }
                Err(join_err) => {
                    let Some(&index) = task_index.get(&join_err.id()) else {
                        continue;
                    };
                    tracing::error!(page = index + 1, error = %join_err, "Page task panicked");
                    outcomes[index] = Some(Outcome::Failed(PageFailure::new(
                        ErrorClass::Other,
                        format!("page task panicked: {}", join_err),
                    )));
                }
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Outcome::NotStarted))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PalimpsestError;
    use crate::types::{CompressionChoice, PageGeometry, PageSource, PageUnit, Rotation};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, sleep};

    fn job(index: usize) -> PageJob {
        PageJob {
            unit: PageUnit {
                index,
                source: PageSource::Image {
                    path: PathBuf::from(format!("page-{}.png", index)),
                    dpi: 300.0,
                },
                geometry: PageGeometry::new(612.0, 792.0, Rotation::Deg0),
                has_existing_text: false,
                has_existing_ocr_text: false,
                policy: None,
            },
            work_dir: PathBuf::from("/tmp"),
        }
    }

    /// Finishes later pages first, fails page 1 and panics on page 3.
    struct Scripted {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageWork for Scripted {
        async fn run(&self, job: PageJob, _cancel: CancellationToken) -> Result<PageResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(40 - 5 * job.unit.index as u64)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            match job.unit.index {
                1 => Err(PalimpsestError::engine("recognition failed")),
                3 => panic!("worker bug"),
                index => Ok(PageResult::copied(index, CompressionChoice::CcittG4)),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_outcomes_follow_submission_order_and_isolate_failures() {
        let work = Arc::new(Scripted {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = ThreadExecutor::new(work.clone(), 2);
        let outcomes = executor
            .submit((0..6).map(job).collect(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 6);
        for (index, outcome) in outcomes.iter().enumerate() {
            match (index, outcome) {
                (1, Outcome::Failed(f)) => assert_eq!(f.class, ErrorClass::Engine),
                (3, Outcome::Failed(f)) => assert!(f.message.contains("panicked")),
                (_, Outcome::Completed(result)) => assert_eq!(result.index, index),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(work.peak.load(Ordering::SeqCst) <= 2);
    }

    struct CancelOnThird {
        started: AtomicUsize,
    }

    #[async_trait]
    impl PageWork for CancelOnThird {
        async fn run(&self, job: PageJob, cancel: CancellationToken) -> Result<PageResult> {
            if self.started.fetch_add(1, Ordering::SeqCst) == 2 {
                cancel.cancel();
            }
            if cancel.is_cancelled() {
                return Err(PalimpsestError::cancelled("before recognition"));
            }
            Ok(PageResult::copied(job.unit.index, CompressionChoice::CcittG4))
        }
    }

    #[tokio::test]
    async fn test_cancellation_leaves_later_jobs_unstarted() {
        let work = Arc::new(CancelOnThird {
            started: AtomicUsize::new(0),
        });
        let executor = ThreadExecutor::new(work.clone(), 1);
        let outcomes = executor
            .submit((0..5).map(job).collect(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcomes[0].is_completed() && outcomes[1].is_completed());
        assert_eq!(outcomes[2], Outcome::Cancelled);
        assert_eq!(outcomes[3], Outcome::NotStarted);
        assert_eq!(outcomes[4], Outcome::NotStarted);
        assert_eq!(work.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let work = Arc::new(CancelOnThird {
            started: AtomicUsize::new(0),
        });
        let outcomes = ThreadExecutor::new(work, 0)
            .submit(Vec::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
