//! Services
//!
//! Business logic of a knowledge-base view: navigation fetching and caching,
//! analysis flows and their batching, keyword search, and the lifecycle
//! registry that lets all of them be cancelled together.

pub mod analysis;
pub mod analysis_stream;
pub mod backend;
pub mod batch_analysis;
pub mod navigation_cache;
pub mod request_lifecycle;
pub mod search_session;
pub mod tree_batch;

pub use analysis::{AnalysisDeps, AnalysisOptions, AnalysisService, ImportCandidate};
pub use batch_analysis::{BatchAnalysisOrchestrator, BatchJob};
pub use navigation_cache::{FetchOptions, NavigationCache};
pub use request_lifecycle::{RequestHandle, RequestLifecycleManager};
pub use search_session::{SearchOptions, SearchSessionManager, SearchTicket};
pub use tree_batch::TreeBatchPlanner;
