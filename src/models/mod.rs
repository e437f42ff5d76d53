//! Data Models
//!
//! Types shared between services, configuration and the CLI.

pub mod analysis;
pub mod export;
pub mod navigation;
pub mod requests;
pub mod search;
pub mod settings;

pub use analysis::*;
pub use export::*;
pub use navigation::*;
pub use requests::*;
pub use search::*;
pub use settings::*;
