//! Frameflow CLI binary.

use clap::Parser;
use frameflow::cli::{self, Cli};
use frameflow::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match cli::run(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", cli::map_error(&e));
            process::exit(1);
        }
    }
}

/// Build logging configuration from CLI args, environment, and config file.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = cli::load_config(cli)
        .map(|c| c.logging)
        .unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_logging_config_verbose() {
        let cli = Cli::try_parse_from(["frameflow", "--verbose", "dispatchers"]).unwrap();
        let config = build_logging_config(&cli);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_log_level_overrides_verbose() {
        let cli =
            Cli::try_parse_from(["frameflow", "--verbose", "--log-level", "warn", "dispatchers"])
                .unwrap();
        let config = build_logging_config(&cli);
        assert_eq!(config.level, "warn");
    }
}
