//! Frameflow: Task Batching and Dispatch
//!
//! A frame-based task dispatch system: task graphs are walked into a DAG of
//! batches, with tasks merged per node and per context, and handed to a
//! pluggable dispatch backend for execution.

pub mod batch;
pub mod batcher;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod frames;
pub mod graph;
pub mod logging;
pub mod script;

#[cfg(test)]
pub(crate) mod testing;
