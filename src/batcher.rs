//! Batching
//!
//! The `Batcher` walks the task graph from a set of requested (node, context)
//! roots and builds the batch DAG: at most one batch per distinct
//! (node, context-minus-frame) pair, frame sets unioned across requests,
//! preTasks duplicate-free, and cyclic dependencies rejected before anything
//! can execute.

use crate::batch::{BatchId, BatchSet, TaskBatch};
use crate::context::{Context, ContextHash, ExcludedPrefixes, FRAME_VARIABLE};
use crate::error::DispatchError;
use crate::graph::{NodeId, Task, TaskGraph, TaskHash};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builds the batch DAG for one dispatch pass.
pub struct Batcher<'a> {
    graph: &'a TaskGraph,
    excluded: ExcludedPrefixes,
    batches: BatchSet,
    root: BatchId,
    /// Task identity -> batch holding it, so repeated requests for the same
    /// work return the existing batch unchanged.
    tasks_to_batches: HashMap<(NodeId, TaskHash), BatchId>,
    /// (node, merge key) -> batch, the per-(node, context-minus-frame)
    /// dedup map.
    current_batches: HashMap<(NodeId, ContextHash), BatchId>,
    /// Pool of representative contexts, one per unique merge hash. Many
    /// batches share identical contexts, so construct each only once.
    context_pool: HashMap<ContextHash, Arc<Context>>,
}

impl<'a> Batcher<'a> {
    pub fn new(graph: &'a TaskGraph, excluded: ExcludedPrefixes) -> Self {
        let mut batches = BatchSet::new();
        let root = batches.add(TaskBatch::new(None, Arc::new(Context::new(1))));
        Self {
            graph,
            excluded,
            batches,
            root,
            tasks_to_batches: HashMap::new(),
            current_batches: HashMap::new(),
            context_pool: HashMap::new(),
        }
    }

    /// Add one dispatch root, recursively resolving its requirements.
    /// On any error nothing is executable; the whole pass is abandoned.
    pub fn add_task(&mut self, task: Task) -> Result<(), DispatchError> {
        let batch = self.batch_walk(task, &HashSet::new(), None)?;
        self.batches.get_mut(self.root).add_pre_task(batch);
        Ok(())
    }

    /// Finish the pass, yielding the arena and the synthetic root batch
    /// whose preTasks are the requested roots.
    pub fn into_batches(self) -> (BatchSet, BatchId) {
        (self.batches, self.root)
    }

    fn batch_walk(
        &mut self,
        task: Task,
        ancestors: &HashSet<BatchId>,
        required_by: Option<NodeId>,
    ) -> Result<BatchId, DispatchError> {
        // Place the task in a batch, then check that doing so hasn't
        // closed a dependency loop on the current resolution path.
        let batch = self.acquire_batch(&task)?;
        if ancestors.contains(&batch) {
            let dependency = self.graph.node(task.node)?.name().to_string();
            let node = match required_by {
                Some(id) => self.graph.node(id)?.name().to_string(),
                None => dependency.clone(),
            };
            return Err(DispatchError::Cycle { node, dependency });
        }

        let node = self.graph.node(task.node)?;
        let pre_tasks = node.requirements(&task.context)?;
        let post_tasks = node.post_requirements(&task.context)?;

        // Batch the postTasks first; they join the ancestor set for the
        // preTask walk below.
        let mut post_batches = Vec::with_capacity(post_tasks.len());
        for post_task in post_tasks {
            post_batches.push(self.batch_walk(post_task, &HashSet::new(), Some(task.node))?);
        }

        let mut pre_ancestors = ancestors.clone();
        pre_ancestors.insert(batch);
        pre_ancestors.extend(post_batches.iter().copied());

        for pre_task in pre_tasks {
            let pre_batch = self.batch_walk(pre_task, &pre_ancestors, Some(task.node))?;
            self.batches.get_mut(batch).add_pre_task(pre_batch);
        }

        // The executor knows nothing of postTasks; emulate them by making
        // this batch a preTask of each post batch, ahead of the post
        // batch's ordinary preTasks, and hanging the post batches off the
        // root so the executor reaches them.
        for post_batch in post_batches {
            let post = self.batches.get_mut(post_batch);
            let index = post.post_task_index;
            if post.insert_pre_task(index, batch) {
                post.post_task_index += 1;
            }
            self.batches.get_mut(self.root).add_pre_task(post_batch);
        }

        Ok(batch)
    }

    fn acquire_batch(&mut self, task: &Task) -> Result<BatchId, DispatchError> {
        let node = self.graph.node(task.node)?;

        // The task hash is the unique identity of the work. A node with no
        // work for this context (a no-op) takes its full context hash
        // instead, so that distinct no-op tasks keep distinct identities.
        let task_hash = node.task_hash(&task.context);
        let is_no_op = task_hash.is_none();
        let task_key = task_hash.unwrap_or_else(|| task.context.hash());

        if let Some(&existing) = self.tasks_to_batches.get(&(task.node, task_key)) {
            return Ok(existing);
        }

        // Requests merge when they agree on every context variable other
        // than the frame. No-op batches key on the full context instead,
        // so merging them cannot serialize otherwise-independent branches.
        let merge_hash = task.context.hash_excluding_frame(&self.excluded);
        let batch_key = if is_no_op {
            (task.node, task.context.hash())
        } else {
            (task.node, merge_hash)
        };

        let batch = match self.current_batches.get(&batch_key) {
            Some(&batch) => batch,
            None => {
                let context = self
                    .context_pool
                    .entry(merge_hash)
                    .or_insert_with(|| {
                        let mut context = task.context.clone();
                        context.remove(FRAME_VARIABLE);
                        Arc::new(context)
                    })
                    .clone();
                let batch = self.batches.add(TaskBatch::new(Some(task.node), context));
                self.current_batches.insert(batch_key, batch);
                batch
            }
        };

        if !is_no_op {
            let frame = task.context.frame();
            self.batches.get_mut(batch).frames.insert(frame);
        }

        self.tasks_to_batches.insert((task.node, task_key), batch);
        Ok(batch)
    }
}
