//! Text dispatch backend
//!
//! Writes a human-readable description of the batch DAG to `job.txt` inside
//! the job directory instead of executing anything. Useful for inspecting
//! what a dispatch *would* run, and for tests that want to assert on batch
//! structure without side effects.

use crate::batch::{BatchId, BlindValue};
use crate::context::FRAME_VARIABLE;
use crate::dispatcher::{DispatchJob, Dispatcher, DispatcherSettings};
use crate::error::DispatchError;
use std::fmt::Write as _;
use std::io::Write as _;
use tracing::info;

const VISITED_KEY: &str = "text:visited";

/// Backend that renders the batch DAG as an indented text report.
#[derive(Default)]
pub struct TextDispatcher {
    settings: DispatcherSettings,
}

impl TextDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn describe_walk(
        job: &mut DispatchJob,
        id: BatchId,
        depth: usize,
        out: &mut String,
    ) -> Result<(), DispatchError> {
        let already_seen =
            matches!(job.batches.get(id).blind_data(VISITED_KEY), Some(BlindValue::Bool(true)));

        let batch = job.batches.get(id);
        let indent = "  ".repeat(depth);
        match batch.node() {
            None => {
                let _ = writeln!(out, "{}root", indent);
            }
            Some(node_id) => {
                let name = job.graph.node(node_id)?.name();
                let _ = write!(out, "{}{} #{}", indent, name, id.index());
                if !batch.frames().is_empty() {
                    let _ = write!(out, " frames {}", batch.frames());
                }
                for (key, value) in batch.context().iter() {
                    if key == FRAME_VARIABLE || key.starts_with("dispatcher:") {
                        continue;
                    }
                    let _ = write!(out, " {}={}", key, value);
                }
                if already_seen {
                    let _ = writeln!(out, " (see above)");
                    return Ok(());
                }
                let _ = writeln!(out);
            }
        }

        job.batches
            .blind_data_mut(id)
            .insert(VISITED_KEY.to_string(), BlindValue::Bool(true));

        let pre_tasks: Vec<BatchId> = job.batches.get(id).pre_tasks().to_vec();
        for pre in pre_tasks {
            Self::describe_walk(job, pre, depth + 1, out)?;
        }
        Ok(())
    }
}

impl Dispatcher for TextDispatcher {
    fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut DispatcherSettings {
        &mut self.settings
    }

    fn do_dispatch(&mut self, mut job: DispatchJob) -> Result<(), DispatchError> {
        let mut report = String::new();
        let _ = writeln!(report, "job {} ({})", job.job_name, job.id);
        let _ = writeln!(report, "frames {}", job.frame_range);
        let root = job.root;
        Self::describe_walk(&mut job, root, 0, &mut report)?;

        let path = job.directory.join("job.txt");
        let mut file = std::fs::File::create(&path)?;
        file.write_all(report.as_bytes())?;
        info!(path = %path.display(), "Wrote dispatch report");
        Ok(())
    }
}
