//! Executor backed by worker processes.
//!
//! Every worker is started with the pipeline configuration and builds its own plugins, engines
//! and collaborators from it; nothing but framed messages crosses the process boundary. A
//! worker takes one job at a time from a shared queue. A worker that dies fails only the job it
//! was running and is replaced.

use super::wire::{Request, Response, read_frame, write_frame};
use super::{Executor, Outcome, PageJob, PageWork};
use crate::core::config::{ExecutorMode, PipelineConfig};
use crate::error::ErrorClass;
use crate::types::{PageFailure, PageResult};
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// File name of the worker binary shipped with the library.
pub const WORKER_BINARY: &str = if cfg!(windows) {
    "palimpsest-worker.exe"
} else {
    "palimpsest-worker"
};

/// How long a worker gets to exit after `Shutdown`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// `palimpsest-worker` next to the current executable, else from `PATH`.
pub fn default_worker_program() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(WORKER_BINARY))
}

type JobQueue = Arc<Mutex<VecDeque<(usize, PageJob)>>>;

/// Everything needed to start a worker.
#[derive(Debug)]
struct Launch {
    program: PathBuf,
    args: Vec<String>,
    config: PipelineConfig,
}

pub struct ProcessExecutor {
    launch: Arc<Launch>,
    max_workers: usize,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, config: PipelineConfig, max_workers: usize) -> Self {
        Self {
            launch: Arc::new(Launch {
                program: program.into(),
                args,
                config,
            }),
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let program = config
            .executor
            .worker_program
            .clone()
            .unwrap_or_else(default_worker_program);
        Self::new(
            program,
            config.executor.worker_args.clone(),
            config.clone(),
            config.executor.resolved_workers(),
        )
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Processes
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    async fn submit(&self, jobs: Vec<PageJob>, cancel: &CancellationToken) -> Result<Vec<Outcome<PageResult>>> {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let queue: JobQueue = Arc::new(Mutex::new(jobs.into_iter().enumerate().collect()));
        let mut drivers = JoinSet::new();
        for slot in 0..self.max_workers.min(total) {
            drivers.spawn(drive(slot, Arc::clone(&self.launch), Arc::clone(&queue), cancel.clone()));
        }

        let mut outcomes: Vec<Option<Outcome<PageResult>>> = (0..total).map(|_| None).collect();
        let mut first_error = None;

        while let Some(joined) = drivers.join_next().await {
            match joined {
                Ok(Ok(finished)) => {
                    for (index, outcome) in finished {
                        outcomes[index] = Some(outcome);
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Worker process could not be started");
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Worker driver panicked");
                    first_error.get_or_insert(PalimpsestError::Worker(join_err.to_string()));
                }
            }
        }

        if let Some(e) = first_error
            && outcomes.iter().all(Option::is_none)
        {
            return Err(e);
        }

        let leftover = if cancel.is_cancelled() {
            Outcome::NotStarted
        } else {
            Outcome::Failed(PageFailure::new(ErrorClass::Other, "no worker process was available"))
        };

        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| leftover.clone()))
            .collect())
    }
}

/// Feed jobs from `queue` to one worker process until the queue is empty or the batch is
/// cancelled.
async fn drive(
    slot: usize,
    launch: Arc<Launch>,
    queue: JobQueue,
    cancel: CancellationToken,
) -> Result<Vec<(usize, Outcome<PageResult>)>> {
    let mut finished = Vec::new();
    let mut worker = WorkerProcess::start(&launch).await?;
    tracing::debug!(slot, pid = worker.pid, "Worker process ready");

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some((index, job)) = queue.lock().pop_front() else {
            break;
        };

        match worker.run(index, job, &cancel).await {
            Ok(outcome) => finished.push((index, outcome)),
            Err(message) => {
                tracing::warn!(slot, pid = worker.pid, page = index + 1, "{}", message);
                finished.push((index, Outcome::Failed(PageFailure::new(ErrorClass::Other, message))));

                if cancel.is_cancelled() || queue.lock().is_empty() {
                    return Ok(finished);
                }
                worker = match WorkerProcess::start(&launch).await {
                    Ok(replacement) => replacement,
                    Err(e) => {
                        tracing::error!(slot, error = %e, "Could not replace worker process");
                        return Ok(finished);
                    }
                };
            }
        }
    }

    worker.shutdown().await;
    Ok(finished)
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    responses: mpsc::Receiver<Result<Response>>,
    pid: u32,
}

impl WorkerProcess {
    async fn start(launch: &Launch) -> Result<Self> {
        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PalimpsestError::MissingDependency(format!(
                        "worker program {} not found",
                        launch.program.display()
                    ))
                } else {
                    PalimpsestError::Worker(format!("failed to start {}: {}", launch.program.display(), e))
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PalimpsestError::Worker("worker stdin is not piped".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PalimpsestError::Worker("worker stdout is not piped".to_string()))?;

        let (tx, mut responses) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                match read_frame::<_, Response>(&mut stdout).await {
                    Ok(Some(response)) => {
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        write_frame(&mut stdin, &Request::Init(Box::new(launch.config.clone()))).await?;

        match responses.recv().await {
            Some(Ok(Response::Ready { pid })) => Ok(Self {
                child,
                stdin,
                responses,
                pid,
            }),
            Some(Ok(Response::Fatal { message })) => Err(PalimpsestError::Worker(message)),
            Some(Ok(other)) => Err(PalimpsestError::Worker(format!("unexpected handshake {:?}", other))),
            Some(Err(e)) => Err(e),
            None => Err(PalimpsestError::Worker(format!(
                "{} exited during startup",
                launch.program.display()
            ))),
        }
    }

    /// Run one job. `Err` means the worker is gone and the message describes why.
    async fn run(
        &mut self,
        index: usize,
        job: PageJob,
        cancel: &CancellationToken,
    ) -> std::result::Result<Outcome<PageResult>, String> {
        let request = Request::Work {
            index,
            job: Box::new(job),
        };
        write_frame(&mut self.stdin, &request)
            .await
            .map_err(|e| format!("worker {} stopped accepting work: {}", self.pid, e))?;

        let mut cancel_sent = false;
        loop {
            tokio::select! {
                message = self.responses.recv() => match message {
                    Some(Ok(Response::Done { index: done, outcome })) if done == index => return Ok(*outcome),
                    Some(Ok(other)) => tracing::warn!(pid = self.pid, ?other, "Ignoring unexpected worker message"),
                    Some(Err(e)) => return Err(format!("worker {} sent an unreadable message: {}", self.pid, e)),
                    None => return Err(format!("worker {} exited while processing page {}", self.pid, index + 1)),
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    if let Err(e) = write_frame(&mut self.stdin, &Request::Cancel).await {
                        tracing::debug!(pid = self.pid, error = %e, "Could not forward cancellation");
                    }
                }
            }
        }
    }

    async fn shutdown(mut self) {
        if let Err(e) = write_frame(&mut self.stdin, &Request::Shutdown).await {
            tracing::debug!(pid = self.pid, error = %e, "Worker already gone");
        }
        drop(self.stdin);

        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => tracing::warn!(pid = self.pid, %status, "Worker exited with failure"),
            Ok(Err(e)) => tracing::warn!(pid = self.pid, error = %e, "Could not wait for worker"),
            Err(_) => {
                tracing::warn!(pid = self.pid, "Worker did not exit in time, killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}

enum WorkerEvent {
    Work {
        index: usize,
        job: Box<PageJob>,
        cancel: CancellationToken,
    },
    Shutdown,
}

/// Worker side of the protocol.
///
/// Reads `Init` and builds the page work from the received configuration with `build`, then
/// answers every `Work` with `Done` until `Shutdown` or end of input.
pub async fn serve_worker<R, W, F>(mut reader: R, mut writer: W, build: F) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    F: FnOnce(PipelineConfig) -> Result<Arc<dyn PageWork>>,
{
    let config = match read_frame::<_, Request>(&mut reader).await? {
        Some(Request::Init(config)) => *config,
        Some(other) => {
            return Err(PalimpsestError::Worker(format!("expected init, received {:?}", other)));
        }
        None => return Ok(()),
    };

    let work = match build(config) {
        Ok(work) => work,
        Err(e) => {
            write_frame(&mut writer, &Response::Fatal { message: e.to_string() }).await?;
            return Err(e);
        }
    };
    write_frame(&mut writer, &Response::Ready { pid: std::process::id() }).await?;

    let (tx, mut events) = mpsc::unbounded_channel();
    let current = Arc::new(Mutex::new(CancellationToken::new()));
    let current_job = Arc::clone(&current);

    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame::<_, Request>(&mut reader).await {
                Ok(Some(Request::Work { index, job })) => {
                    let cancel = CancellationToken::new();
                    *current_job.lock() = cancel.clone();
                    if tx.send(WorkerEvent::Work { index, job, cancel }).is_err() {
                        break;
                    }
                }
                Ok(Some(Request::Cancel)) => current_job.lock().cancel(),
                Ok(Some(Request::Shutdown)) | Ok(None) => {
                    let _ = tx.send(WorkerEvent::Shutdown);
                    break;
                }
                Ok(Some(Request::Init(_))) => tracing::warn!("Ignoring repeated init"),
                Err(e) => {
                    tracing::error!(error = %e, "Cannot read from coordinator");
                    current_job.lock().cancel();
                    let _ = tx.send(WorkerEvent::Shutdown);
                    break;
                }
            }
        }
    });

    while let Some(event) = events.recv().await {
        let WorkerEvent::Work { index, job, cancel } = event else {
            break;
        };

        let work = Arc::clone(&work);
        let outcome = match tokio::spawn(async move { work.run(*job, cancel).await }).await {
            Ok(result) => Outcome::from_result(result),
            Err(join_err) => Outcome::Failed(PageFailure::new(
                ErrorClass::Other,
                format!("page task panicked: {}", join_err),
            )),
        };

        write_frame(
            &mut writer,
            &Response::Done {
                index,
                outcome: Box::new(outcome),
            },
        )
        .await?;
    }

    reader_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompressionChoice, PageGeometry, PageSource, PageUnit, Rotation};

    struct Echo;

    #[async_trait]
    impl PageWork for Echo {
        async fn run(&self, job: PageJob, _cancel: CancellationToken) -> Result<PageResult> {
            if job.unit.index == 1 {
                return Err(PalimpsestError::engine("no text found"));
            }
            Ok(PageResult::copied(job.unit.index, CompressionChoice::CcittG4))
        }
    }

    fn job(index: usize) -> PageJob {
        PageJob {
            unit: PageUnit {
                index,
                source: PageSource::Image {
                    path: PathBuf::from("p.png"),
                    dpi: 300.0,
                },
                geometry: PageGeometry::new(100.0, 100.0, Rotation::Deg0),
                has_existing_text: false,
                has_existing_ocr_text: false,
                policy: None,
            },
            work_dir: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn test_serve_worker_answers_each_job() {
        let (mut coordinator_tx, worker_rx) = tokio::io::duplex(64 * 1024);
        let (worker_tx, mut coordinator_rx) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(serve_worker(worker_rx, worker_tx, |_config| Ok(Arc::new(Echo) as Arc<dyn PageWork>)));

        write_frame(&mut coordinator_tx, &Request::Init(Box::default())).await.unwrap();
        let ready: Response = read_frame(&mut coordinator_rx).await.unwrap().unwrap();
        assert!(matches!(ready, Response::Ready { .. }));

        for index in 0..2 {
            write_frame(
                &mut coordinator_tx,
                &Request::Work {
                    index,
                    job: Box::new(job(index)),
                },
            )
            .await
            .unwrap();
            let done: Response = read_frame(&mut coordinator_rx).await.unwrap().unwrap();
            match (index, done) {
                (0, Response::Done { index: 0, outcome }) => assert!(outcome.is_completed()),
                (1, Response::Done { index: 1, outcome }) => {
                    assert!(matches!(*outcome, Outcome::Failed(ref f) if f.class == ErrorClass::Engine));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        write_frame(&mut coordinator_tx, &Request::Shutdown).await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejected_config_is_reported() {
        let (mut coordinator_tx, worker_rx) = tokio::io::duplex(64 * 1024);
        let (worker_tx, mut coordinator_rx) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(serve_worker(worker_rx, worker_tx, |_config| {
            Err(PalimpsestError::validation("unknown plugin"))
        }));

        write_frame(&mut coordinator_tx, &Request::Init(Box::default())).await.unwrap();
        let response: Response = read_frame(&mut coordinator_rx).await.unwrap().unwrap();
        assert!(matches!(response, Response::Fatal { ref message } if message.contains("unknown plugin")));
        assert!(server.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_missing_worker_program() {
        let executor = ProcessExecutor::new(
            "/nonexistent/palimpsest-worker",
            Vec::new(),
            PipelineConfig::default(),
            2,
        );
        let err = executor
            .submit(vec![job(0)], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PalimpsestError::MissingDependency(_)));
    }
}
