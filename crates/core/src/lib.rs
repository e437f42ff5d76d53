//! Wiki Lens Core
//!
//! Shared types for the Wiki Lens workspace: the stream event union every
//! streaming flow decodes into, the navigation forest, search result items,
//! proxy settings and the core error type. This crate has no runtime or
//! network dependencies.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `streaming` - Closed `StreamEvent` union and wire payload decoding
//! - `tree` - `NavigationNode` forest type and traversal helpers
//! - `search` - Search result item carried by `detail` records
//! - `proxy` - Proxy configuration data types shared across workspace crates

pub mod error;
pub mod proxy;
pub mod search;
pub mod streaming;
pub mod tree;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{decode_payload, StreamEvent, DONE_SENTINEL};

// ── Tree & Search Types ────────────────────────────────────────────────
pub use search::SearchResultItem;
pub use tree::{count_forest, NavigationNode, MISSING_TOKEN_PLACEHOLDER};
