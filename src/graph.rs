//! Task graph
//!
//! The boundary contract with the computation graph: a `TaskGraph` owns named
//! task nodes, and each node reports per-Context upstream requirements and
//! executes its work over a frame list. Batches refer to nodes through
//! `NodeId` handles rather than owning references; a handle that no longer
//! resolves mid-dispatch is a hard error.

use crate::context::Context;
use crate::error::GraphError;
use crate::frames::FrameSet;
use crate::script::Script;
use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// Handle to a node within a `TaskGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// One requested unit of work: a node evaluated in a context.
#[derive(Debug, Clone)]
pub struct Task {
    pub node: NodeId,
    pub context: Context,
}

impl Task {
    pub fn new(node: NodeId, context: Context) -> Self {
        Self { node, context }
    }
}

/// Identity digest of a task's work for a given context. `None` from
/// `TaskNode::task_hash` marks the task as a no-op: the node does nothing
/// for that context, and its batches exist only to depend on upstream
/// batches.
pub type TaskHash = [u8; 32];

/// A node capable of producing executable work for a given context.
pub trait TaskNode: Send + Sync {
    /// Name of the node, unique within its graph.
    fn name(&self) -> &str;

    /// The upstream work this node depends on when evaluated in `context`.
    /// May fan out per-frame or per-variable by deriving new contexts.
    fn requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError>;

    /// Downstream work that must run after this node whenever this node is
    /// dispatched. Most nodes have none.
    fn post_requirements(&self, _context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(Vec::new())
    }

    /// Identity of the work performed in `context`, or `None` for no-ops.
    fn task_hash(&self, context: &Context) -> Option<TaskHash>;

    /// Perform the node's work for the given sorted frame list.
    fn execute_sequence(&self, frames: &FrameSet, context: &Context) -> Result<(), GraphError>;
}

/// Owner of task nodes, addressed by `NodeId` or by name.
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<Box<dyn TaskNode>>,
    by_name: BTreeMap<String, NodeId>,
    script: Option<Script>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its handle.
    pub fn add(&mut self, node: Box<dyn TaskNode>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_name.insert(node.name().to_string(), id);
        self.nodes.push(node);
        id
    }

    /// Resolve a handle. Fails if the handle does not belong to this graph.
    pub fn node(&self, id: NodeId) -> Result<&dyn TaskNode, GraphError> {
        self.nodes
            .get(id.0)
            .map(|node| node.as_ref())
            .ok_or(GraphError::InvalidNode(id.0))
    }

    /// Look up a node by name.
    pub fn by_name(&self, name: &str) -> Result<NodeId, GraphError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The script this graph was built from, if any. Required for
    /// out-of-process re-execution.
    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub(crate) fn set_script(&mut self, script: Script) {
        self.script = Some(script);
    }
}

fn hash_task(node_name: &str, payload: &str, context: &Context) -> TaskHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(node_name.as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(&context.frame().to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Runs a shell command once per frame, with `${frame}` and other context
/// variables substituted into the command line.
pub struct SystemCommand {
    name: String,
    command: String,
    pre_tasks: Vec<NodeId>,
    post_tasks: Vec<NodeId>,
}

impl SystemCommand {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            pre_tasks: Vec::new(),
            post_tasks: Vec::new(),
        }
    }

    pub fn with_pre_tasks(mut self, pre_tasks: Vec<NodeId>) -> Self {
        self.pre_tasks = pre_tasks;
        self
    }

    pub fn with_post_tasks(mut self, post_tasks: Vec<NodeId>) -> Self {
        self.post_tasks = post_tasks;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl TaskNode for SystemCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(self
            .pre_tasks
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn post_requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(self
            .post_tasks
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn task_hash(&self, context: &Context) -> Option<TaskHash> {
        let command = context.substitute(&self.command);
        Some(hash_task(&self.name, &command, context))
    }

    fn execute_sequence(&self, frames: &FrameSet, context: &Context) -> Result<(), GraphError> {
        for frame in frames.iter() {
            let frame_context = context.with_frame(frame);
            let command = frame_context.substitute(&self.command);
            debug!(node = %self.name, frame, %command, "Running system command");

            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .map_err(|e| GraphError::Execution {
                    node: self.name.clone(),
                    frames: frame.to_string(),
                    message: format!("failed to run {:?}: {}", command, e),
                })?;

            if !status.success() {
                return Err(GraphError::Execution {
                    node: self.name.clone(),
                    frames: frame.to_string(),
                    message: format!("{:?} exited with {}", command, status),
                });
            }
        }
        Ok(())
    }
}

/// A no-op grouping node. Its batches carry no frames and exist only to
/// depend on upstream batches.
pub struct TaskList {
    name: String,
    pre_tasks: Vec<NodeId>,
    post_tasks: Vec<NodeId>,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_tasks: Vec::new(),
            post_tasks: Vec::new(),
        }
    }

    pub fn with_pre_tasks(mut self, pre_tasks: Vec<NodeId>) -> Self {
        self.pre_tasks = pre_tasks;
        self
    }

    pub fn with_post_tasks(mut self, post_tasks: Vec<NodeId>) -> Self {
        self.post_tasks = post_tasks;
        self
    }
}

impl TaskNode for TaskList {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(self
            .pre_tasks
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn post_requirements(&self, context: &Context) -> Result<Vec<Task>, GraphError> {
        Ok(self
            .post_tasks
            .iter()
            .map(|id| Task::new(*id, context.clone()))
            .collect())
    }

    fn task_hash(&self, _context: &Context) -> Option<TaskHash> {
        None
    }

    fn execute_sequence(&self, _frames: &FrameSet, _context: &Context) -> Result<(), GraphError> {
        Ok(())
    }
}
