//! Integration Tests Module
//!
//! End-to-end tests of a wired knowledge-base view against in-memory
//! collaborators: navigation caching, batched and single-call analyses,
//! streaming search, record decoding and teardown.

mod support;

// Analysis flows, batching and cancellation
mod analysis_test;

// Navigation cache sharing and teardown
mod navigation_test;

// Search sessions and paging
mod search_test;

// Stream record decoding
mod stream_test;
