//! Command-line surface of dayflow
//!
//! This module provides:
//! - Command implementations (run, show, history, validate, doctor)
//! - Output handlers (console, JSON, quiet)
//!
//! # Example
//!
//! ```ignore
//! use dayflow::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_analysis(&config, &options, &*handler).await?;
//! ```

pub mod commands;
pub mod output;

pub use commands::{
    RunOptions, doctor, execute_analysis, history, list_history, run_analysis, show, show_log,
    validate,
};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
