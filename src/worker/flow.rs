//! One task through its full lifecycle
//!
//! A cycle is split into two stages so the runner can overlap them:
//! [`TaskFlow::acquire`] asks for a task and downloads its image,
//! [`TaskFlow::complete`] recognises it, reports and cleans up.
//! Expected waits (empty queue, refused key) and unexpected failures are
//! absorbed here and turned into a [`CycleOutcome`]; only errors the worker
//! cannot recover from are returned as `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::files::WorkFiles;
use super::{CycleOutcome, CycleState, FlowError, SkipReason};
use crate::client::{ClientError, DocumentReport, QueueClient, Task};
use crate::config::WorkerConfig;
use crate::ocr::{OcrEngine, OcrRun};

/// A task whose image is on disk and ready for recognition
#[derive(Debug)]
pub struct AcquiredTask {
    pub task: Task,
    pub task_id: String,
    pub files: WorkFiles,
}

/// Result of the first stage of a cycle
#[derive(Debug)]
pub enum Acquisition {
    Ready(AcquiredTask),
    /// Nothing to process; the cycle already ended
    Finished(CycleOutcome),
}

pub struct TaskFlow {
    client: Arc<dyn QueueClient>,
    engine: Arc<dyn OcrEngine>,
    work_dir: PathBuf,
    fault_cooldown: Duration,
}

impl TaskFlow {
    pub fn new(
        client: Arc<dyn QueueClient>,
        engine: Arc<dyn OcrEngine>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            client,
            engine,
            work_dir: config.work_dir.clone(),
            fault_cooldown: config.fault_cooldown.as_duration(),
        }
    }

    /// Run one complete cycle
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CycleOutcome, FlowError> {
        match self.acquire(cancel).await? {
            Acquisition::Ready(job) => self.complete(cancel, job).await,
            Acquisition::Finished(outcome) => Ok(outcome),
        }
    }

    /// Ask the server for a task and download its image
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Acquisition, FlowError> {
        debug!(state = %CycleState::Acquiring, "Requesting task");
        let task = match self.client.acquire_task(cancel).await {
            Ok(task) => task,
            Err(e) => {
                return self
                    .settle(cancel, CycleState::Acquiring, None, e.into())
                    .await
                    .map(Acquisition::Finished);
            }
        };

        let Some(task_id) = task.id().map(str::to_string) else {
            let outcome = self
                .fault(cancel, CycleState::Acquiring, &FlowError::MissingTaskId)
                .await;
            return Ok(Acquisition::Finished(outcome));
        };

        info!(
            task_id = %task_id,
            filename = %task.orig_filename,
            priority = task.priority,
            demo = task.is_demo(),
            "Task acquired"
        );

        let files = WorkFiles::new(&self.work_dir, &task.internal_file_name);
        match self.download(cancel, &task_id, &files).await {
            Ok(bytes) => {
                debug!(task_id = %task_id, bytes, path = %files.input().display(), "Image downloaded");
                Ok(Acquisition::Ready(AcquiredTask {
                    task,
                    task_id,
                    files,
                }))
            }
            Err(e) => {
                drop(files);
                self.abandon(&task_id).await;
                self.settle(cancel, CycleState::Downloading, Some(task_id), e)
                    .await
                    .map(Acquisition::Finished)
            }
        }
    }

    /// Recognise a downloaded task, report the result and remove its files
    pub async fn complete(
        &self,
        cancel: &CancellationToken,
        job: AcquiredTask,
    ) -> Result<CycleOutcome, FlowError> {
        let AcquiredTask {
            task,
            task_id,
            files,
        } = job;

        debug!(task_id = %task_id, state = %CycleState::Processing, "Running OCR engine");
        let run = match self
            .engine
            .recognize(cancel, files.input(), files.input())
            .await
        {
            Ok(run) => run,
            Err(e) => {
                drop(files);
                self.abandon(&task_id).await;
                return self
                    .settle(cancel, CycleState::Processing, Some(task_id), e.into())
                    .await;
            }
        };

        let output = self.engine.output_path(files.input());
        let report = build_report(&task, &task_id, &run, &output).await;
        let valid = report.is_valid();

        debug!(task_id = %task_id, state = %CycleState::Reporting, valid, "Sending report");
        let reported = match self.client.report_result(cancel, &task_id, report).await {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    valid,
                    elapsed_secs = run.elapsed.as_secs_f64(),
                    "Task reported"
                );
                true
            }
            Err(ClientError::Cancelled) => {
                drop(files);
                self.abandon(&task_id).await;
                return Ok(CycleOutcome::Cancelled {
                    task_id: Some(task_id),
                });
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Report lost, task result discarded");
                false
            }
        };

        drop(files);
        debug!(task_id = %task_id, state = %CycleState::Done, "Cycle finished");
        Ok(CycleOutcome::Completed {
            task_id,
            valid,
            reported,
        })
    }

    /// Tell the server a task will not be finished; never fails
    pub async fn abandon(&self, task_id: &str) {
        info!(task_id, state = %CycleState::Cancelling, "Abandoning task");
        if let Err(e) = self.client.cancel_task(task_id).await {
            warn!(task_id, error = %e, "Cancel notice not delivered");
        }
    }

    /// Abandon a task that was acquired but never completed
    pub async fn abandon_job(&self, job: AcquiredTask) {
        let AcquiredTask { task_id, files, .. } = job;
        drop(files);
        self.abandon(&task_id).await;
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        files: &WorkFiles,
    ) -> Result<u64, FlowError> {
        let mut stream = self.client.fetch_file(cancel, task_id).await?;

        let path = files.input();
        let storage = |source: std::io::Error| FlowError::Storage {
            path: path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(path).await.map_err(storage)?;

        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled.into()),
                chunk = stream.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await.map_err(storage)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(storage)?;

        Ok(written)
    }

    /// Turn a stage failure into the cycle's outcome
    async fn settle(
        &self,
        cancel: &CancellationToken,
        state: CycleState,
        task_id: Option<String>,
        error: FlowError,
    ) -> Result<CycleOutcome, FlowError> {
        if error.is_cancelled() {
            debug!(state = %state, "Cycle interrupted by shutdown");
            return Ok(CycleOutcome::Cancelled { task_id });
        }
        if error.is_fatal() {
            error!(state = %state, error = %error, "Unrecoverable failure");
            return Err(error);
        }

        match &error {
            FlowError::Client(ClientError::NoWorkAvailable { message, delay }) => {
                debug!(reason = %message, delay_secs = delay.as_secs(), "No task available");
                Ok(self.wait(cancel, SkipReason::NoWorkAvailable, *delay).await)
            }
            FlowError::Client(ClientError::AccessDenied { message, delay }) => {
                warn!(reason = %message, delay_secs = delay.as_secs(), "Blocked by server");
                Ok(self.wait(cancel, SkipReason::AccessDenied, *delay).await)
            }
            _ => Ok(self.fault(cancel, state, &error).await),
        }
    }

    async fn wait(
        &self,
        cancel: &CancellationToken,
        reason: SkipReason,
        delay: Duration,
    ) -> CycleOutcome {
        pause(cancel, delay).await;
        CycleOutcome::WaitedAndSkipped { reason, delay }
    }

    async fn fault(
        &self,
        cancel: &CancellationToken,
        state: CycleState,
        error: &FlowError,
    ) -> CycleOutcome {
        warn!(
            state = %state,
            error = %error,
            cooldown_secs = self.fault_cooldown.as_secs(),
            "Cycle failed, cooling down"
        );
        pause(cancel, self.fault_cooldown).await;
        CycleOutcome::Faulted {
            state,
            error: error.to_string(),
        }
    }
}

/// Success when the engine exited cleanly and its text is readable
async fn build_report(task: &Task, task_id: &str, run: &OcrRun, output: &Path) -> DocumentReport {
    if !run.succeeded() {
        let message = run.failure_message();
        warn!(task_id, exit_code = ?run.exit_code, error = %message, "OCR engine failed");
        return DocumentReport::failure(
            task_id,
            run.started,
            run.ended,
            &task.orig_filename,
            message,
            run.elapsed,
        );
    }

    match tokio::fs::read(output).await {
        Ok(bytes) => DocumentReport::success(
            task_id,
            run.started,
            run.ended,
            &task.orig_filename,
            String::from_utf8_lossy(&bytes).into_owned(),
            run.elapsed,
        ),
        Err(e) => {
            let message = format!("failed to read OCR output {}: {}", output.display(), e);
            warn!(task_id, error = %message, "OCR output missing");
            DocumentReport::failure(
                task_id,
                run.started,
                run.ended,
                &task.orig_filename,
                message,
                run.elapsed,
            )
        }
    }
}

/// Sleep unless shutdown comes first
async fn pause(cancel: &CancellationToken, delay: Duration) {
    debug!(state = %CycleState::Idle, delay_secs = delay.as_secs(), "Pausing before next request");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FileStream;
    use crate::humanize::HumanDuration;
    use crate::ocr::{OcrError, text_output_path};
    use async_trait::async_trait;
    use chrono::Local;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const TASK_ID: &str = "00000000-0000-0000-0000-000000000000";

    #[derive(Default)]
    enum FakeFetch {
        #[default]
        Serve,
        /// Never answers until shutdown
        Stall,
        /// Shutdown arrives once the transfer has started
        ShutdownMidStream,
    }

    #[derive(Default)]
    struct FakeQueue {
        tasks: Mutex<VecDeque<Result<Task, ClientError>>>,
        fetch: FakeFetch,
        report_error: Mutex<Option<ClientError>>,
        calls: Mutex<Vec<String>>,
        reports: Mutex<Vec<DocumentReport>>,
    }

    impl FakeQueue {
        fn with(results: Vec<Result<Task, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                tasks: Mutex::new(results.into()),
                ..Self::default()
            })
        }

        fn fetching(results: Vec<Result<Task, ClientError>>, fetch: FakeFetch) -> Arc<Self> {
            Arc::new(Self {
                tasks: Mutex::new(results.into()),
                fetch,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl QueueClient for FakeQueue {
        async fn acquire_task(&self, _cancel: &CancellationToken) -> Result<Task, ClientError> {
            self.record("acquire".into());
            self.tasks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ClientError::NoWorkAvailable {
                    message: "empty".into(),
                    delay: Duration::from_secs(1),
                }))
        }

        async fn fetch_file(
            &self,
            cancel: &CancellationToken,
            task_id: &str,
        ) -> Result<FileStream, ClientError> {
            self.record(format!("fetch:{task_id}"));
            match self.fetch {
                FakeFetch::Serve => {}
                FakeFetch::Stall => {
                    cancel.cancelled().await;
                    return Err(ClientError::Cancelled);
                }
                FakeFetch::ShutdownMidStream => cancel.cancel(),
            }
            Ok(FileStream::from_bytes(&b"jpeg"[..]))
        }

        async fn report_result(
            &self,
            _cancel: &CancellationToken,
            task_id: &str,
            report: DocumentReport,
        ) -> Result<(), ClientError> {
            self.record(format!("report:{task_id}"));
            self.reports.lock().unwrap().push(report);
            match self.report_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn cancel_task(&self, task_id: &str) -> Result<(), ClientError> {
            self.record(format!("cancel:{task_id}"));
            Ok(())
        }
    }

    enum FakeRun {
        Text(&'static str),
        Exit(i32, &'static str),
        NotInstalled,
        Hang,
    }

    struct FakeEngine(FakeRun);

    #[async_trait]
    impl OcrEngine for FakeEngine {
        async fn recognize(
            &self,
            cancel: &CancellationToken,
            input: &Path,
            output_stem: &Path,
        ) -> Result<OcrRun, OcrError> {
            assert_eq!(std::fs::read(input).unwrap(), b"jpeg");
            let started = Local::now();
            let finished = |exit_code: i32, stderr: &str| OcrRun {
                exit_code: Some(exit_code),
                stderr: stderr.to_string(),
                started,
                ended: Local::now(),
                elapsed: Duration::from_millis(250),
            };

            match self.0 {
                FakeRun::Text(text) => {
                    std::fs::write(text_output_path(output_stem), text).unwrap();
                    Ok(finished(0, ""))
                }
                FakeRun::Exit(code, stderr) => Ok(finished(code, stderr)),
                FakeRun::NotInstalled => Err(OcrError::Spawn {
                    program: "tesseract".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not found"),
                }),
                FakeRun::Hang => {
                    cancel.cancelled().await;
                    Err(OcrError::Cancelled)
                }
            }
        }
    }

    fn task(id: &str) -> Task {
        Task::from_body(&format!(r#"{{"TaskId":"{id}","OrigFilename":"testfile.jpg"}}"#)).unwrap()
    }

    fn flow(queue: &Arc<FakeQueue>, run: FakeRun, work_dir: &Path) -> TaskFlow {
        let config = WorkerConfig {
            work_dir: work_dir.to_path_buf(),
            fault_cooldown: HumanDuration::from_secs(300),
            prefetch: false,
        };
        TaskFlow::new(queue.clone(), Arc::new(FakeEngine(run)), &config)
    }

    fn work_dir_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_task_is_reported_and_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task(TASK_ID))]);
        let flow = flow(&queue, FakeRun::Text("HELLO"), dir.path());

        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                task_id: TASK_ID.into(),
                valid: true,
                reported: true,
            }
        );
        assert_eq!(
            queue.calls(),
            ["acquire", &format!("fetch:{TASK_ID}"), &format!("report:{TASK_ID}")]
        );

        let reports = queue.reports.lock().unwrap();
        assert_eq!(reports[0].is_valid, 1);
        assert_eq!(reports[0].documents[0].text.as_deref(), Some("HELLO"));
        assert_eq!(reports[0].documents[0].filename, "testfile.jpg");
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_failure_is_reported_as_invalid() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-4"))]);
        let flow = flow(&queue, FakeRun::Exit(2, "cannot read file\n"), dir.path());

        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed { valid: false, reported: true, .. }));
        let reports = queue.reports.lock().unwrap();
        assert_eq!(reports[0].is_valid, 0);
        assert_eq!(reports[0].error.as_deref(), Some("cannot read file"));
        assert!(reports[0].documents[0].text.is_none());
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_without_output_is_reported_as_invalid() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-5"))]);
        let flow = flow(&queue, FakeRun::Exit(0, ""), dir.path());

        flow.run(&CancellationToken::new()).await.unwrap();

        let reports = queue.reports.lock().unwrap();
        assert_eq!(reports[0].is_valid, 0);
        assert!(
            reports[0]
                .error
                .as_deref()
                .unwrap()
                .starts_with("failed to read OCR output")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_waits_exactly_the_server_delay() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Err(ClientError::NoWorkAvailable {
            message: "empty queue".into(),
            delay: Duration::from_secs(10),
        })]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let started = Instant::now();
        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(
            outcome,
            CycleOutcome::WaitedAndSkipped {
                reason: SkipReason::NoWorkAvailable,
                delay: Duration::from_secs(10),
            }
        );
        assert_eq!(queue.calls(), ["acquire"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied_waits_without_downloading() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Err(ClientError::AccessDenied {
            message: "bad key".into(),
            delay: Duration::from_secs(300),
        })]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let started = Instant::now();
        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(300));
        assert!(matches!(
            outcome,
            CycleOutcome::WaitedAndSkipped { reason: SkipReason::AccessDenied, .. }
        ));
        assert_eq!(queue.calls(), ["acquire"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_task_id_faults_before_download() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(Task::unassigned())]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let started = Instant::now();
        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(300));
        assert!(matches!(
            outcome,
            CycleOutcome::Faulted { state: CycleState::Acquiring, .. }
        ));
        assert_eq!(queue.calls(), ["acquire"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_faults_with_cooldown() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Err(ClientError::UnexpectedStatus {
            status: 404,
            body: "missing".into(),
        })]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let started = Instant::now();
        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(300));
        match outcome {
            CycleOutcome::Faulted { error, .. } => assert!(error.contains("404")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_report_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-6"))]);
        *queue.report_error.lock().unwrap() = Some(ClientError::RetriesExhausted {
            attempts: 6,
            last_error: "HTTP 503".into(),
        });
        let flow = flow(&queue, FakeRun::Text("HELLO"), dir.path());

        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed { valid: true, reported: false, .. }));
        assert!(!queue.calls().contains(&"cancel:t-6".to_string()));
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_ocr_abandons_task() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-7"))]);
        let flow = flow(&queue, FakeRun::Hang, dir.path());

        let job = match flow.acquire(&CancellationToken::new()).await.unwrap() {
            Acquisition::Ready(job) => job,
            other => panic!("expected a task, got {other:?}"),
        };
        let input = job.files.input().to_path_buf();
        assert!(input.exists());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = flow.complete(&cancel, job).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Cancelled {
                task_id: Some("t-7".into())
            }
        );
        assert_eq!(queue.calls().last().unwrap(), "cancel:t-7");
        assert!(!input.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_engine_is_fatal_and_abandons_task() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-8"))]);
        let flow = flow(&queue, FakeRun::NotInstalled, dir.path());

        let err = flow.run(&CancellationToken::new()).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(queue.calls().last().unwrap(), "cancel:t-8");
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_job_removes_files() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![Ok(task("t-9"))]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let Acquisition::Ready(job) = flow.acquire(&CancellationToken::new()).await.unwrap() else {
            panic!("expected a task");
        };
        flow.abandon_job(job).await;

        assert_eq!(queue.calls().last().unwrap(), "cancel:t-9");
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_download_abandons_task() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::fetching(vec![Ok(task("t-10"))], FakeFetch::Stall);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let outcome = flow.run(&cancel).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Cancelled {
                task_id: Some("t-10".into())
            }
        );
        assert_eq!(queue.calls(), ["acquire", "fetch:t-10", "cancel:t-10"]);
        assert!(work_dir_is_empty(&dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_stream_removes_partial_image() {
        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::fetching(vec![Ok(task("t-11"))], FakeFetch::ShutdownMidStream);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());

        let outcome = flow.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Cancelled {
                task_id: Some("t-11".into())
            }
        );
        assert_eq!(queue.calls(), ["acquire", "fetch:t-11", "cancel:t-11"]);
        assert!(queue.reports.lock().unwrap().is_empty());
        assert!(work_dir_is_empty(&dir));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn line_with(&self, message: &str) -> String {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .find(|line| line.contains(message))
                .unwrap_or_else(|| panic!("no log line with {message:?}"))
                .to_string()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_key_warns_and_empty_queue_stays_quiet() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = TempDir::new().unwrap();
        let queue = FakeQueue::with(vec![
            Err(ClientError::AccessDenied {
                message: "bad key".into(),
                delay: Duration::from_secs(300),
            }),
            Err(ClientError::NoWorkAvailable {
                message: "empty queue".into(),
                delay: Duration::from_secs(10),
            }),
        ]);
        let flow = flow(&queue, FakeRun::Text("unused"), dir.path());
        let cancel = CancellationToken::new();

        flow.run(&cancel).await.unwrap();
        flow.run(&cancel).await.unwrap();

        let blocked = logs.line_with("Blocked by server");
        assert!(blocked.contains("WARN"), "{blocked}");
        assert!(blocked.contains("bad key"), "{blocked}");

        let idle = logs.line_with("No task available");
        assert!(idle.contains("DEBUG"), "{idle}");
        assert!(!idle.contains("WARN"), "{idle}");

        let pause = logs.line_with("Pausing before next request");
        assert!(pause.contains("state=idle"), "{pause}");
    }
}
