//! Command-line interface: clap definitions plus the route table that turns
//! a parsed command into dispatcher calls.

use crate::config::{ConfigLoader, FrameflowConfig};
use crate::context::Context;
use crate::dispatcher::local::{default_job_pool, LocalDispatcher};
use crate::dispatcher::registry;
use crate::dispatcher::{Dispatcher, FramesMode};
use crate::error::DispatchError;
use crate::frames::FrameSet;
use crate::graph::TaskGraph;
use crate::script::Script;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Frameflow CLI - task batching and dispatch
#[derive(Parser)]
#[command(name = "frameflow")]
#[command(about = "Batch task graphs into frame ranges and dispatch them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute nodes from a script directly in this process
    Execute {
        /// Script file to load
        #[arg(long)]
        script: PathBuf,

        /// Names of the nodes to execute
        #[arg(long, num_args = 1.., required = true)]
        nodes: Vec<String>,

        /// Frame specification, e.g. "1-10x2,20"
        #[arg(long, default_value = "1")]
        frames: String,

        /// Extra context variable, as a NAME VALUE pair; repeatable
        #[arg(long = "context", num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
        context: Vec<String>,
    },
    /// Dispatch nodes from a script through a registered backend
    Dispatch {
        /// Script file to load
        #[arg(long)]
        script: PathBuf,

        /// Names of the root nodes to dispatch
        #[arg(long, num_args = 1.., required = true)]
        nodes: Vec<String>,

        /// Backend to dispatch with; defaults to the configured one
        #[arg(long)]
        dispatcher: Option<String>,

        /// Job name template
        #[arg(long)]
        job_name: Option<String>,

        /// Jobs-root directory template
        #[arg(long)]
        jobs_directory: Option<String>,

        /// Frame specification; implies the custom frames mode
        #[arg(long)]
        frames: Option<String>,

        /// Execute in the background, one subprocess per batch
        /// (Local backend only)
        #[arg(long)]
        background: bool,

        /// Extra context variable, as a NAME VALUE pair; repeatable
        #[arg(long = "context", num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
        context: Vec<String>,
    },
    /// List the registered dispatch backends
    Dispatchers,
}

/// Execute a parsed command. Returns the text to print on success.
pub fn run(cli: &Cli) -> Result<String, DispatchError> {
    let config = load_config(cli)?;
    registry::register_builtin_dispatchers();

    match &cli.command {
        Commands::Execute {
            script,
            nodes,
            frames,
            context,
        } => run_execute(script, nodes, frames, context),
        Commands::Dispatch {
            script,
            nodes,
            dispatcher,
            job_name,
            jobs_directory,
            frames,
            background,
            context,
        } => run_dispatch(
            &config,
            script,
            nodes,
            dispatcher.as_deref(),
            job_name.as_deref(),
            jobs_directory.as_deref(),
            frames.as_deref(),
            *background,
            context,
        ),
        Commands::Dispatchers => {
            let mut lines = Vec::new();
            for name in registry::registered_dispatchers() {
                if name == registry::default_dispatcher_type() {
                    lines.push(format!("{} (default)", name));
                } else {
                    lines.push(name);
                }
            }
            Ok(lines.join("\n"))
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<FrameflowConfig, DispatchError> {
    match &cli.config {
        Some(path) => ConfigLoader::with_project_file(path).load(),
        None => ConfigLoader::new().load(),
    }
}

fn load_graph(script: &PathBuf) -> Result<Arc<TaskGraph>, DispatchError> {
    let script = Script::load(script)?;
    Ok(Arc::new(script.build()?))
}

fn context_from_pairs(frame: i64, pairs: &[String]) -> Context {
    let mut context = Context::new(frame);
    for pair in pairs.chunks(2) {
        if let [name, value] = pair {
            context.set(name.clone(), crate::context::ContextValue::parse(value));
        }
    }
    context
}

fn run_execute(
    script: &PathBuf,
    nodes: &[String],
    frames: &str,
    context_pairs: &[String],
) -> Result<String, DispatchError> {
    let graph = load_graph(script)?;
    let frames = FrameSet::parse(frames)?;
    let first_frame = frames.iter().next().unwrap_or(1);
    let context = context_from_pairs(first_frame, context_pairs);

    for name in nodes {
        let node_id = graph.by_name(name)?;
        let node = graph.node(node_id)?;
        info!(node = %name, frames = %frames, "Executing");
        node.execute_sequence(&frames, &context)?;
    }
    Ok(String::new())
}

#[allow(clippy::too_many_arguments)]
fn run_dispatch(
    config: &FrameflowConfig,
    script: &PathBuf,
    nodes: &[String],
    dispatcher_type: Option<&str>,
    job_name: Option<&str>,
    jobs_directory: Option<&str>,
    frames: Option<&str>,
    background: bool,
    context_pairs: &[String],
) -> Result<String, DispatchError> {
    let graph = load_graph(script)?;
    let node_ids = nodes
        .iter()
        .map(|name| graph.by_name(name))
        .collect::<Result<Vec<_>, _>>()?;

    let dispatcher_type = dispatcher_type
        .map(str::to_string)
        .unwrap_or_else(|| config.dispatcher.dispatcher.clone());

    let mut dispatcher: Box<dyn Dispatcher> = if background {
        if dispatcher_type != "Local" {
            return Err(DispatchError::Configuration(
                "--background is only supported by the Local dispatcher".to_string(),
            ));
        }
        let mut local = LocalDispatcher::new();
        local.local_settings_mut().execute_in_background = true;
        Box::new(local)
    } else {
        registry::create(&dispatcher_type)?
    };

    *dispatcher.settings_mut() = config.dispatcher.settings();
    if let Some(job_name) = job_name {
        dispatcher.settings_mut().job_name = job_name.to_string();
    }
    if let Some(jobs_directory) = jobs_directory {
        dispatcher.settings_mut().jobs_directory = jobs_directory.to_string();
    }
    if let Some(frames) = frames {
        dispatcher.settings_mut().frames_mode = FramesMode::CustomRange;
        dispatcher.settings_mut().frame_range = frames.to_string();
    }

    let context = context_from_pairs(1, context_pairs);
    dispatcher.dispatch(&graph, &node_ids, &context)?;

    if background {
        // The process would otherwise exit under the controller thread.
        default_job_pool().wait_for_all();
        for job in default_job_pool().jobs() {
            if job.status() != crate::dispatcher::local::JobStatus::Complete {
                return Err(DispatchError::BatchExecution {
                    node: job.name().to_string(),
                    frames: job.frame_range().to_string(),
                });
            }
        }
    }
    Ok(String::new())
}

/// User-facing rendering of an error.
pub fn map_error(error: &DispatchError) -> String {
    match error {
        DispatchError::Configuration(message) => format!("Configuration error: {}", message),
        DispatchError::UnknownDispatcher(name) => format!(
            "Unknown dispatcher '{}'. Run `frameflow dispatchers` to list the registered ones.",
            name
        ),
        other => format!("Error: {}", other),
    }
}
