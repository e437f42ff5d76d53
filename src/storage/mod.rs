//! Storage Layer
//!
//! Configuration persistence (TOML).

pub mod config;

pub use config::*;
