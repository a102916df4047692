//! Task batches
//!
//! A `TaskBatch` is one node of the execution DAG: a task node, the set of
//! frames it should run over, a representative context with the frame
//! removed, and the upstream batches that must complete first. Batches live
//! in a `BatchSet` arena and refer to each other through `BatchId` handles,
//! so the DAG itself carries no owning cycles.

use crate::context::Context;
use crate::frames::FrameSet;
use crate::graph::NodeId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle to a batch within a `BatchSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub(crate) usize);

impl BatchId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Open annotation value for batch blind data.
#[derive(Debug, Clone, PartialEq)]
pub enum BlindValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A node of the execution DAG.
#[derive(Debug, Clone)]
pub struct TaskBatch {
    /// The node to execute; `None` for the synthetic root batch.
    pub(crate) node: Option<NodeId>,
    pub(crate) frames: FrameSet,
    pub(crate) context: Arc<Context>,
    pub(crate) pre_tasks: Vec<BatchId>,
    /// Scratch annotations for backends and tools. Unlike the DAG fields,
    /// blind data stays mutable after batching, through
    /// `BatchSet::blind_data_mut`.
    pub(crate) blind_data: BTreeMap<String, BlindValue>,
    /// Number of leading `pre_tasks` entries that are emulated postTask
    /// relationships rather than ordinary upstream dependencies.
    pub(crate) post_task_index: usize,
}

impl TaskBatch {
    pub(crate) fn new(node: Option<NodeId>, context: Arc<Context>) -> Self {
        Self {
            node,
            frames: FrameSet::new(),
            context,
            pre_tasks: Vec::new(),
            blind_data: BTreeMap::new(),
            post_task_index: 0,
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Upstream batches, duplicate-free, in discovery order.
    pub fn pre_tasks(&self) -> &[BatchId] {
        &self.pre_tasks
    }

    pub fn blind_data(&self, key: &str) -> Option<&BlindValue> {
        self.blind_data.get(key)
    }

    /// Append `pre` unless already listed; true when appended.
    pub(crate) fn add_pre_task(&mut self, pre: BatchId) -> bool {
        if self.pre_tasks.contains(&pre) {
            return false;
        }
        self.pre_tasks.push(pre);
        true
    }

    /// Insert an emulated preTask arising from a postTask relationship at
    /// `index`, so that such preTasks stay ahead of the batch's ordinary
    /// ones.
    pub(crate) fn insert_pre_task(&mut self, index: usize, pre: BatchId) -> bool {
        if self.pre_tasks.contains(&pre) {
            return false;
        }
        self.pre_tasks.insert(index, pre);
        true
    }
}

/// Arena owning every batch created during one batching pass.
#[derive(Debug, Default)]
pub struct BatchSet {
    batches: Vec<TaskBatch>,
}

impl BatchSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, batch: TaskBatch) -> BatchId {
        let id = BatchId(self.batches.len());
        self.batches.push(batch);
        id
    }

    pub fn get(&self, id: BatchId) -> &TaskBatch {
        &self.batches[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: BatchId) -> &mut TaskBatch {
        &mut self.batches[id.0]
    }

    /// Mutable access to a batch's annotation side-space.
    pub fn blind_data_mut(&mut self, id: BatchId) -> &mut BTreeMap<String, BlindValue> {
        &mut self.batches[id.0].blind_data
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = BatchId> {
        (0..self.batches.len()).map(BatchId)
    }
}
