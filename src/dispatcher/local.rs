//! Local dispatch backend
//!
//! Executes a batch DAG on this machine, either synchronously in-process
//! (foreground) or on a dedicated controller thread that launches one
//! subprocess per batch (background). Batches run strictly sequentially in
//! dependency order in both modes; background mode parallelizes the dispatch
//! call against its caller, not batch against batch.

use crate::batch::{BatchId, BatchSet, BlindValue};
use crate::context::{Context, FRAME_VARIABLE};
use crate::dispatcher::{DispatchJob, Dispatcher, DispatcherSettings};
use crate::error::DispatchError;
use crate::frames::FrameSet;
use crate::graph::{NodeId, TaskGraph};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Blind-data key marking a batch as executed, so batches reachable along
/// several paths run once.
const EXECUTED_KEY: &str = "local:executed";

/// Blind-data key caching a batch's node name.
const NODE_NAME_KEY: &str = "local:nodeName";

/// How often the controller thread polls a running subprocess.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings specific to the local backend.
#[derive(Debug, Clone, Default)]
pub struct LocalSettings {
    /// Dispatch on a background thread, one subprocess per batch.
    pub execute_in_background: bool,
    /// The re-execution command for background batches. Defaults to the
    /// current executable.
    pub executable: Option<PathBuf>,
}

/// Status of a local job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Running,
    Complete,
    Failed,
    Killed,
}

impl JobStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Killed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Killed => "Killed",
        };
        write!(f, "{}", name)
    }
}

enum ExecError {
    Cancelled,
    Failed(DispatchError),
}

impl From<DispatchError> for ExecError {
    fn from(error: DispatchError) -> Self {
        Self::Failed(error)
    }
}

struct JobInner {
    name: String,
    id: String,
    directory: PathBuf,
    script_file: Option<PathBuf>,
    frame_range: FrameSet,
    graph: Arc<TaskGraph>,
    root: BatchId,
    /// The dispatch context, used to decide which batch-context variables
    /// a subprocess needs on its command line.
    context: Context,
    background: bool,
    executable: PathBuf,
    batches: Mutex<BatchSet>,
    status: Mutex<JobStatus>,
    start_time: DateTime<Utc>,
    end_time: Mutex<Option<DateTime<Utc>>>,
    cancelled: AtomicBool,
    current_child: Mutex<Option<Child>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// One dispatch invocation's worth of work, as tracked by the job pool.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Capture everything the execution walk needs up front; once a
    /// background thread is running it must not reach back into the
    /// dispatcher.
    pub(crate) fn new(
        mut dispatch: DispatchJob,
        background: bool,
        executable: PathBuf,
    ) -> Result<Self, DispatchError> {
        let ids: Vec<BatchId> = dispatch.batches.ids().collect();
        for id in ids {
            if let Some(node_id) = dispatch.batches.get(id).node() {
                let name = dispatch.graph.node(node_id)?.name().to_string();
                dispatch
                    .batches
                    .blind_data_mut(id)
                    .insert(NODE_NAME_KEY.to_string(), BlindValue::Str(name));
            }
        }

        Ok(Self {
            inner: Arc::new(JobInner {
                name: dispatch.job_name,
                id: dispatch.id,
                directory: dispatch.directory,
                script_file: dispatch.script_file,
                frame_range: dispatch.frame_range,
                graph: dispatch.graph,
                root: dispatch.root,
                context: dispatch.context,
                background,
                executable,
                batches: Mutex::new(dispatch.batches),
                status: Mutex::new(JobStatus::Waiting),
                start_time: Utc::now(),
                end_time: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                current_child: Mutex::new(None),
                thread: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.inner.directory
    }

    pub fn frame_range(&self) -> &FrameSet {
        &self.inner.frame_range
    }

    pub fn status(&self) -> JobStatus {
        *self.inner.status.lock()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    /// Wall-clock running time; stops advancing once the job reaches a
    /// terminal status.
    pub fn running_time(&self) -> chrono::Duration {
        let end = self.inner.end_time.lock().unwrap_or_else(Utc::now);
        end - self.inner.start_time
    }

    /// Request cancellation: no further batch starts, and any in-flight
    /// subprocess is killed. A job that never started goes straight to
    /// `Killed`.
    pub fn kill(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.inner.current_child.lock().as_mut() {
            let _ = child.kill();
        }
        let waiting = *self.inner.status.lock() == JobStatus::Waiting;
        if waiting {
            self.update_status(JobStatus::Killed);
        }
    }

    /// Block until a background controller thread finishes. Foreground jobs
    /// return immediately.
    pub fn wait(&self) {
        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub(crate) fn execute(&self) -> Result<(), DispatchError> {
        if !self.inner.background {
            return self.execute_internal();
        }

        let job = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("frameflow-local-{}", self.inner.id))
            .spawn(move || {
                // Failures are reflected in the job status and the log;
                // the dispatching caller has already returned.
                let _ = job.execute_internal();
            })?;
        *self.inner.thread.lock() = Some(handle);
        Ok(())
    }

    #[instrument(skip(self), fields(job = %self.inner.name, id = %self.inner.id))]
    fn execute_internal(&self) -> Result<(), DispatchError> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            self.update_status(JobStatus::Killed);
            return Ok(());
        }

        self.update_status(JobStatus::Running);

        let mut batches = self.inner.batches.lock();
        let result = self.execute_walk(&mut batches, self.inner.root);
        drop(batches);

        match result {
            Ok(()) => {
                self.update_status(JobStatus::Complete);
                Ok(())
            }
            Err(ExecError::Cancelled) => {
                self.update_status(JobStatus::Killed);
                Ok(())
            }
            Err(ExecError::Failed(error)) => {
                self.update_status(JobStatus::Failed);
                Err(error)
            }
        }
    }

    fn execute_walk(&self, batches: &mut BatchSet, id: BatchId) -> Result<(), ExecError> {
        if let Some(BlindValue::Bool(true)) = batches.get(id).blind_data(EXECUTED_KEY) {
            // Visited along another path.
            return Ok(());
        }

        let pre_tasks: Vec<BatchId> = batches.get(id).pre_tasks().to_vec();
        for pre in pre_tasks {
            self.execute_walk(batches, pre)?;
        }

        let batch = batches.get(id);
        let node_id = match batch.node() {
            Some(node_id) => node_id,
            None => return Ok(()), // the synthetic root
        };
        if batch.frames().is_empty() {
            // No-op batches exist only to order their upstream batches.
            return Ok(());
        }

        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(ExecError::Cancelled);
        }

        let frames = batch.frames().clone();
        let context = batch.context().clone();
        let node_name = match batch.blind_data(NODE_NAME_KEY) {
            Some(BlindValue::Str(name)) => name.clone(),
            _ => format!("batch {}", id.index()),
        };

        info!(node = %node_name, frames = %frames, "Executing");
        let started = Instant::now();

        match self.execute_batch(node_id, &node_name, &frames, &context) {
            Ok(()) => {
                info!(
                    node = %node_name,
                    frames = %frames,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Completed"
                );
                batches
                    .blind_data_mut(id)
                    .insert(EXECUTED_KEY.to_string(), BlindValue::Bool(true));
                Ok(())
            }
            Err(ExecError::Cancelled) => Err(ExecError::Cancelled),
            Err(ExecError::Failed(cause)) => {
                error!(node = %node_name, frames = %frames, %cause, "Execution failed");
                Err(ExecError::Failed(cause))
            }
        }
    }

    fn execute_batch(
        &self,
        node_id: NodeId,
        node_name: &str,
        frames: &FrameSet,
        context: &Context,
    ) -> Result<(), ExecError> {
        // Simple case for foreground execution.
        if !self.inner.background {
            let node = self.inner.graph.node(node_id).map_err(DispatchError::from)?;
            return node.execute_sequence(frames, context).map_err(|cause| {
                debug!(node = %node_name, %cause, "Node raised");
                ExecError::Failed(DispatchError::BatchExecution {
                    node: node_name.to_string(),
                    frames: frames.to_string(),
                })
            });
        }

        // Background execution: launch a subprocess that reloads the script
        // snapshot and re-executes just this node over the batch's frames.
        let script_file = self.inner.script_file.as_ref().ok_or_else(|| {
            DispatchError::Configuration(
                "Background execution requires a script snapshot".to_string(),
            )
        })?;

        let mut command = Command::new(&self.inner.executable);
        command
            .arg("execute")
            .arg("--script")
            .arg(script_file)
            .arg("--nodes")
            .arg(node_name)
            .arg("--frames")
            .arg(frames.to_string());

        // Forward batch-context variables the subprocess cannot derive
        // itself: anything that is not in the dispatch context, or differs
        // from it. The frame and UI state never travel.
        for (key, value) in context.iter() {
            if key == FRAME_VARIABLE || key.starts_with("ui:") {
                continue;
            }
            let differs = self.inner.context.get(key) != Some(value);
            if differs {
                command.arg("--context").arg(key).arg(value.to_string());
            }
        }

        debug!(node = %node_name, command = ?command, "Launching subprocess");

        let child = command.spawn().map_err(|e| {
            ExecError::Failed(DispatchError::SubprocessLaunch {
                node: node_name.to_string(),
                message: e.to_string(),
            })
        })?;
        *self.inner.current_child.lock() = Some(child);

        // Wait for the subprocess, killing it if cancellation is requested
        // in the meantime.
        let status = loop {
            if self.inner.cancelled.load(Ordering::SeqCst) {
                if let Some(child) = self.inner.current_child.lock().as_mut() {
                    let _ = child.kill();
                }
            }

            let mut guard = self.inner.current_child.lock();
            let child = match guard.as_mut() {
                Some(child) => child,
                None => return Err(ExecError::Cancelled),
            };
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    drop(guard);
                    self.inner.current_child.lock().take();
                    return Err(ExecError::Failed(DispatchError::Io(e)));
                }
            }
            drop(guard);
            std::thread::sleep(POLL_INTERVAL);
        };
        self.inner.current_child.lock().take();

        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(ExecError::Cancelled);
        }
        if !status.success() {
            return Err(ExecError::Failed(DispatchError::BatchExecution {
                node: node_name.to_string(),
                frames: frames.to_string(),
            }));
        }
        Ok(())
    }

    fn update_status(&self, status: JobStatus) {
        {
            let mut current = self.inner.status.lock();
            if *current == status {
                return;
            }
            *current = status;
        }
        if status.is_terminal() {
            *self.inner.end_time.lock() = Some(Utc::now());
        }
        info!(job = %self.inner.name, id = %self.inner.id, %status, "Job status changed");
    }
}

/// Process-wide bookkeeping of in-flight jobs, so tooling can enumerate,
/// wait on, and kill background dispatches. State is memory-only; no job
/// survives a restart.
#[derive(Default)]
pub struct JobPool {
    jobs: Mutex<Vec<Job>>,
}

impl JobPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&self, job: Job) {
        self.jobs.lock().push(job);
    }

    pub fn remove_job(&self, job: &Job) {
        self.jobs
            .lock()
            .retain(|existing| !Arc::ptr_eq(&existing.inner, &job.inner));
    }

    /// Jobs in the order they were added.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    /// Block until no job is waiting or running.
    pub fn wait_for_all(&self) {
        loop {
            let busy = self
                .jobs
                .lock()
                .iter()
                .any(|job| !job.status().is_terminal());
            if !busy {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

/// The process-wide default pool.
pub fn default_job_pool() -> Arc<JobPool> {
    static DEFAULT: OnceLock<Arc<JobPool>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(JobPool::new())).clone()
}

/// Dispatch backend that executes on the local machine.
pub struct LocalDispatcher {
    settings: DispatcherSettings,
    local_settings: LocalSettings,
    pool: Arc<JobPool>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::with_pool(default_job_pool())
    }

    pub fn with_pool(pool: Arc<JobPool>) -> Self {
        Self {
            settings: DispatcherSettings::default(),
            local_settings: LocalSettings::default(),
            pool,
        }
    }

    pub fn local_settings(&self) -> &LocalSettings {
        &self.local_settings
    }

    pub fn local_settings_mut(&mut self) -> &mut LocalSettings {
        &mut self.local_settings
    }

    pub fn job_pool(&self) -> &Arc<JobPool> {
        &self.pool
    }
}

impl Default for LocalDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for LocalDispatcher {
    fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut DispatcherSettings {
        &mut self.settings
    }

    fn do_dispatch(&mut self, dispatch: DispatchJob) -> Result<(), DispatchError> {
        let background = self.local_settings.execute_in_background;
        if background && dispatch.script_file.is_none() {
            return Err(DispatchError::Configuration(
                "Background execution requires a graph built from a script".to_string(),
            ));
        }

        let executable = match &self.local_settings.executable {
            Some(executable) => executable.clone(),
            None => std::env::current_exe()?,
        };

        let job = Job::new(dispatch, background, executable)?;
        self.pool.add_job(job.clone());
        job.execute()
    }
}
