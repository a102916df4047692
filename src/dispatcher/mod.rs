//! Dispatchers
//!
//! A dispatcher turns a set of requested task nodes plus a context into
//! actual execution: it acquires a uniquely-named job directory, snapshots
//! the graph's script for out-of-process re-execution, builds the batch DAG,
//! and hands the DAG to a backend. Backends are registered by name (see
//! [`registry`]); the stock ones are [`local::LocalDispatcher`] and
//! [`text::TextDispatcher`].

use crate::batch::{BatchId, BatchSet};
use crate::batcher::Batcher;
use crate::context::{
    Context, ContextValue, ExcludedPrefixes, JOB_DIRECTORY_VARIABLE, SCRIPT_FILE_VARIABLE,
};
use crate::error::DispatchError;
use crate::frames::FrameSet;
use crate::graph::{NodeId, Task, TaskGraph};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod local;
pub mod registry;
pub mod text;

/// Upper bound on directory-creation attempts during a dispatch. Collisions
/// with concurrent dispatchers resolve within a couple of retries; hitting
/// the bound means the filesystem is persistently refusing us.
pub const MAX_DIRECTORY_ATTEMPTS: u64 = 1000;

/// File name of the script snapshot inside a job directory.
pub const SCRIPT_FILE_NAME: &str = "script.json";

/// How a dispatcher chooses the frames to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramesMode {
    /// Just the frame of the dispatch context.
    CurrentFrame,
    /// The full range advertised by the context
    /// (`frameRange:start` / `frameRange:end`).
    FullRange,
    /// The `frame_range` setting, parsed as a frame specification.
    CustomRange,
}

/// Per-dispatcher configuration. Owned by whoever hosts the dispatcher;
/// never mutated by the batcher or a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Job name template; variables are substituted from the dispatch
    /// context.
    pub job_name: String,
    /// Jobs-root directory template. Must be set before dispatching.
    pub jobs_directory: String,
    pub frames_mode: FramesMode,
    /// Frame specification used by `FramesMode::CustomRange`.
    pub frame_range: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            job_name: "untitled".to_string(),
            jobs_directory: String::new(),
            frames_mode: FramesMode::CurrentFrame,
            frame_range: "1-100x10".to_string(),
        }
    }
}

/// Everything a backend needs to execute one dispatch invocation.
pub struct DispatchJob {
    pub graph: Arc<TaskGraph>,
    pub batches: BatchSet,
    pub root: BatchId,
    /// The dispatch context, extended with `dispatcher:jobDirectory` and
    /// `dispatcher:scriptFileName`.
    pub context: Context,
    pub job_name: String,
    /// The numeric directory id, e.g. `000002`.
    pub id: String,
    pub directory: PathBuf,
    /// Path of the script snapshot, when the graph has one.
    pub script_file: Option<PathBuf>,
    pub frame_range: FrameSet,
}

/// A dispatch backend. `dispatch` drives the shared orchestration;
/// `do_dispatch` is the backend-specific execution strategy.
pub trait Dispatcher: Send {
    fn settings(&self) -> &DispatcherSettings;

    fn settings_mut(&mut self) -> &mut DispatcherSettings;

    /// Execute a prepared job. Called by `dispatch` once batching has
    /// succeeded and the root batch has at least one preTask.
    fn do_dispatch(&mut self, job: DispatchJob) -> Result<(), DispatchError>;

    /// Dispatch the given root nodes with `context`. Configuration and
    /// batching errors are raised here, before anything executes.
    #[instrument(skip_all)]
    fn dispatch(
        &mut self,
        graph: &Arc<TaskGraph>,
        roots: &[NodeId],
        context: &Context,
    ) -> Result<(), DispatchError> {
        if roots.is_empty() {
            return Ok(());
        }

        let settings = self.settings();
        let frame_range = resolve_frame_range(settings, context)?;
        let job_name = context.substitute(&settings.job_name);

        let (directory, id) = acquire_job_directory(settings, context)?;
        info!(job = %job_name, id = %id, directory = %directory.display(), "Acquired job directory");

        let mut job_context = context.clone();
        job_context.set(
            JOB_DIRECTORY_VARIABLE,
            directory.display().to_string(),
        );
        let script_file = graph.script().map(|_| directory.join(SCRIPT_FILE_NAME));
        if let Some(path) = &script_file {
            job_context.set(SCRIPT_FILE_VARIABLE, path.display().to_string());
        }

        let mut batcher = Batcher::new(graph, ExcludedPrefixes::default());
        for frame in frame_range.iter() {
            let frame_context = job_context.with_frame(frame);
            for root in roots {
                batcher.add_task(Task::new(*root, frame_context.clone()))?;
            }
        }
        let (batches, root_batch) = batcher.into_batches();
        debug!(batches = batches.len() - 1, "Batching complete");

        // Snapshot the script. In a nested dispatch the outer invocation
        // has already written it.
        if let Some(path) = &script_file {
            if !path.exists() {
                if let Some(script) = graph.script() {
                    script.save(path)?;
                }
            }
        }

        if batches.get(root_batch).pre_tasks().is_empty() {
            return Ok(());
        }

        self.do_dispatch(DispatchJob {
            graph: graph.clone(),
            batches,
            root: root_batch,
            context: job_context,
            job_name,
            id,
            directory,
            script_file,
            frame_range,
        })
    }
}

/// Expand the dispatch frame range according to the settings.
fn resolve_frame_range(
    settings: &DispatcherSettings,
    context: &Context,
) -> Result<FrameSet, DispatchError> {
    match settings.frames_mode {
        FramesMode::CurrentFrame => Ok(FrameSet::from_frames([context.frame()])),
        FramesMode::FullRange => {
            let bound = |name: &str, default: i64| match context.get(name) {
                Some(ContextValue::Int(value)) => *value,
                _ => default,
            };
            let start = bound("frameRange:start", 1);
            let end = bound("frameRange:end", 100);
            if start > end {
                return Err(DispatchError::Configuration(format!(
                    "Invalid full frame range {}-{}",
                    start, end
                )));
            }
            Ok(FrameSet::from_frames(start..=end))
        }
        FramesMode::CustomRange => {
            let spec = context.substitute(&settings.frame_range);
            Ok(FrameSet::parse(&spec)?)
        }
    }
}

/// Acquire a uniquely-numbered job directory under the configured jobs
/// root, retrying on collision with concurrent dispatchers. When the
/// context already names a job directory we are nested inside another
/// dispatch, and reuse it.
fn acquire_job_directory(
    settings: &DispatcherSettings,
    context: &Context,
) -> Result<(PathBuf, String), DispatchError> {
    if let Some(ContextValue::Str(existing)) = context.get(JOB_DIRECTORY_VARIABLE) {
        let directory = PathBuf::from(existing);
        let id = directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok((directory, id));
    }

    if settings.jobs_directory.is_empty() {
        return Err(DispatchError::Configuration(
            "Jobs directory is not set".to_string(),
        ));
    }

    let mut job_directory = PathBuf::from(context.substitute(&settings.jobs_directory));
    let job_name = context.substitute(&settings.job_name);
    if !job_name.is_empty() {
        job_directory.push(&job_name);
    }
    std::fs::create_dir_all(&job_directory)?;

    next_numbered_directory(&job_directory)
}

/// Create the next numbered subdirectory of `parent`. Concurrent creators
/// are resolved by the filesystem's atomic create-if-not-exists; we retry
/// past ids another process claimed first.
pub fn next_numbered_directory(parent: &Path) -> Result<(PathBuf, String), DispatchError> {
    // Find the highest existing numbered entry.
    let mut next = 0u64;
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if let Ok(existing) = entry.file_name().to_string_lossy().parse::<u64>() {
            next = next.max(existing + 1);
        }
    }

    for attempt in 0..MAX_DIRECTORY_ATTEMPTS {
        let id = format!("{:06}", next + attempt);
        let numbered = parent.join(&id);
        match std::fs::create_dir(&numbered) {
            Ok(()) => return Ok((numbered, id)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(directory = %numbered.display(), "Job directory claimed concurrently, retrying");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(DispatchError::DirectoryExhausted(parent.to_path_buf()))
}
