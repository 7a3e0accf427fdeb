//! dayflow: a typed step-pipeline engine and the daily source-control
//! activity analysis built on it.

pub mod analysis;
pub mod cli;
pub mod completion;
pub mod config;
pub mod logging;
pub mod source;
pub mod store;
pub mod template;
pub mod workflow;
