//! Configuration types and loading for dayflow

mod backend;
mod loader;
mod sections;

pub use backend::BackendConfig;
pub use loader::DayflowConfig;
pub use sections::{CompletionConfig, Defaults, GithubConfig, StoreConfig};
