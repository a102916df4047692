//! Error types for the frameflow dispatch system.

use std::path::PathBuf;
use thiserror::Error;

/// Graph-boundary errors: node resolution, requirements queries, and
/// node execution failures.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid node reference: {0:?}")]
    InvalidNode(usize),

    #[error("{node}: failed to resolve requirements: {message}")]
    Requirements { node: String, message: String },

    #[error("{node}: execution failed for frames {frames}: {message}")]
    Execution {
        node: String,
        frames: String,
        message: String,
    },

    #[error("Script error: {0}")]
    Script(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame-specification parse errors.
#[derive(Debug, Error)]
pub enum FrameSetError {
    #[error("Invalid frame specification: {0:?}")]
    InvalidSpec(String),

    #[error("Invalid frame range {0:?}: start exceeds end")]
    InvertedRange(String),

    #[error("Invalid frame step in {0:?}: step must be positive")]
    InvalidStep(String),
}

/// Dispatch-level errors, ordered roughly by the phase in which they occur.
///
/// Configuration and batching errors are raised before any execution starts.
/// Execution errors stop the job; dependents of the failed batch and any
/// batch not yet started are skipped, and completed batches are not rolled
/// back.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dispatched tasks cannot have cyclic dependencies but {node} requires {dependency} which is already being resolved")]
    Cycle { node: String, dependency: String },

    #[error("Exhausted job directory ids under {0:?}")]
    DirectoryExhausted(PathBuf),

    #[error("{node}: execution failed for frames {frames}")]
    BatchExecution { node: String, frames: String },

    #[error("{node}: failed to launch subprocess: {message}")]
    SubprocessLaunch { node: String, message: String },

    #[error("Unknown dispatcher type: {0:?}")]
    UnknownDispatcher(String),

    #[error("Frame specification error: {0}")]
    FrameSet(#[from] FrameSetError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
