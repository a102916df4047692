//! Test support: scriptable stub nodes that record execution order.

use crate::context::Context;
use crate::error::GraphError;
use crate::frames::FrameSet;
use crate::graph::{NodeId, Task, TaskHash, TaskNode};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared log of executed (node, frames) entries, in execution order.
pub(crate) type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn execution_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A task node whose dependencies can be wired up after the graph is built,
/// which is what a cycle needs. Executions are appended to a shared log.
pub(crate) struct RecordingNode {
    name: String,
    pre_tasks: Mutex<Vec<NodeId>>,
    post_tasks: Mutex<Vec<NodeId>>,
    /// When non-empty, returned from `requirements` verbatim instead of the
    /// wired `pre_tasks`. Lets a test fan out to specific (node, context)
    /// pairs.
    explicit_requirements: Mutex<Vec<Task>>,
    no_op: bool,
    fail: bool,
    log: ExecutionLog,
}

impl RecordingNode {
    pub(crate) fn new(name: &str, log: &ExecutionLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre_tasks: Mutex::new(Vec::new()),
            post_tasks: Mutex::new(Vec::new()),
            explicit_requirements: Mutex::new(Vec::new()),
            no_op: false,
            fail: false,
            log: log.clone(),
        })
    }

    pub(crate) fn new_no_op(name: &str, log: &ExecutionLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre_tasks: Mutex::new(Vec::new()),
            post_tasks: Mutex::new(Vec::new()),
            explicit_requirements: Mutex::new(Vec::new()),
            no_op: true,
            fail: false,
            log: log.clone(),
        })
    }

    pub(crate) fn new_failing(name: &str, log: &ExecutionLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre_tasks: Mutex::new(Vec::new()),
            post_tasks: Mutex::new(Vec::new()),
            explicit_requirements: Mutex::new(Vec::new()),
            no_op: false,
            fail: true,
            log: log.clone(),
        })
    }

    pub(crate) fn set_pre_tasks(&self, ids: Vec<NodeId>) {
        *self.pre_tasks.lock() = ids;
    }

    pub(crate) fn set_post_tasks(&self, ids: Vec<NodeId>) {
        *self.post_tasks.lock() = ids;
    }

    pub(crate) fn set_requirements(&self, tasks: Vec<Task>) {
        *self.explicit_requirements.lock() = tasks;
    }
}

/// Boxable handle so the same node can live in a graph and stay reachable
/// from the test.
pub(crate) struct NodeHandle(pub(crate) Arc<RecordingNode>);

impl TaskNode for NodeHandle {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        let explicit = self.0.explicit_requirements.lock();
        if !explicit.is_empty() {
            return Ok(explicit.clone());
        }
        Ok(self
            .0
            .pre_tasks
            .lock()
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn post_requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(self
            .0
            .post_tasks
            .lock()
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn task_hash(&self, context: &Context) -> Option<TaskHash> {
        if self.0.no_op {
            return None;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.0.name.as_bytes());
        hasher.update(&context.hash());
        Some(*hasher.finalize().as_bytes())
    }

    fn execute_sequence(&self, frames: &FrameSet, _context: &Context) -> Result<(), GraphError> {
        self.0
            .log
            .lock()
            .push(format!("{}:{}", self.0.name, frames));
        if self.0.fail {
            return Err(GraphError::Execution {
                node: self.0.name.clone(),
                frames: frames.to_string(),
                message: "deliberate test failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Clone for NodeHandle {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
