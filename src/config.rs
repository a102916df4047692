//! Configuration
//!
//! Layered configuration: defaults, then a global file
//! (`~/.config/frameflow/config.toml`), then a project file
//! (`./frameflow.toml`), then `FRAMEFLOW_*` environment variables. Later
//! sources win per-key.

use crate::dispatcher::FramesMode;
use crate::error::DispatchError;
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameflowConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to newly-created dispatchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Backend to use when none is named on the command line.
    #[serde(default = "default_dispatcher_type")]
    pub dispatcher: String,

    /// Jobs-root directory template.
    #[serde(default)]
    pub jobs_directory: String,

    #[serde(default = "default_job_name")]
    pub job_name: String,

    #[serde(default = "default_frames_mode")]
    pub frames_mode: FramesMode,

    #[serde(default = "default_frame_range")]
    pub frame_range: String,
}

fn default_dispatcher_type() -> String {
    "Local".to_string()
}

fn default_job_name() -> String {
    "untitled".to_string()
}

fn default_frames_mode() -> FramesMode {
    FramesMode::CurrentFrame
}

fn default_frame_range() -> String {
    "1-100x10".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dispatcher: default_dispatcher_type(),
            jobs_directory: String::new(),
            job_name: default_job_name(),
            frames_mode: default_frames_mode(),
            frame_range: default_frame_range(),
        }
    }
}

impl DispatcherConfig {
    /// Settings for a dispatcher created from this configuration.
    pub fn settings(&self) -> crate::dispatcher::DispatcherSettings {
        crate::dispatcher::DispatcherSettings {
            job_name: self.job_name.clone(),
            jobs_directory: self.jobs_directory.clone(),
            frames_mode: self.frames_mode,
            frame_range: self.frame_range.clone(),
        }
    }
}

/// Path to the global config file, honoring `$XDG_CONFIG_HOME`.
pub fn global_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("frameflow").join("config.toml"));
    }
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("frameflow")
            .join("config.toml")
    })
}

/// Loads configuration from the standard sources.
pub struct ConfigLoader {
    project_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_file: Some(PathBuf::from("frameflow.toml")),
        }
    }

    /// Use `path` instead of `./frameflow.toml` as the project-level source.
    pub fn with_project_file(path: &Path) -> Self {
        Self {
            project_file: Some(path.to_path_buf()),
        }
    }

    pub fn load(&self) -> Result<FrameflowConfig, DispatchError> {
        let mut builder: ConfigBuilder<DefaultState> = config::Config::builder();

        if let Some(global) = global_config_path() {
            if global.exists() {
                debug!(path = %global.display(), "Loading global configuration");
                builder = builder.add_source(File::from(global).required(false));
            }
        }

        if let Some(project) = &self.project_file {
            if project.exists() {
                debug!(path = %project.display(), "Loading project configuration");
                builder = builder.add_source(File::from(project.clone()).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FRAMEFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| DispatchError::Configuration(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| DispatchError::Configuration(e.to_string()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
