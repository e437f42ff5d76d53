//! Wiki Lens - streaming AI analysis for hierarchical knowledge bases
//!
//! This library provides the orchestration core behind a knowledge-base view:
//! - Navigation tree fetching with a time-bounded, deduplicating cache
//! - Structure, document and import analyses streamed from a model backend
//! - Batching of large trees with a final summary pass
//! - Streaming keyword search sessions
//! - Cancellation of every in-flight request from one registry

pub mod cli;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::settings::{AppConfig, SettingsUpdate};
pub use state::{Collaborators, SpaceViewState};
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};
