//! Wiki Lens Transport
//!
//! Everything between the services and the wire:
//! - `stream_reader` - `ChunkedStreamReader` and the cancellable `EventStream`
//! - `analysis` - streaming analysis requests behind the `AnalysisTransport` seam
//! - `http_client` - client factory plus JSON and streamed request helpers
//! - `retry` - bounded retry for plain calls
//! - `error` - `TransportError` and HTTP status mapping

pub mod analysis;
pub mod error;
pub mod http_client;
pub mod retry;
pub mod stream_reader;

pub use analysis::{
    placeholders, AnalysisRequest, AnalysisTransport, HttpAnalysisTransport, ImportTarget,
    ModelSettings,
};
pub use error::{parse_http_error, TransportError, TransportResult};
pub use http_client::{build_http_client, fetch_json, open_stream, send_with_timeout};
pub use retry::{rate_limit_delay, with_retry, RetryPolicy};
pub use stream_reader::{read_stream, ByteStream, ChunkedStreamReader, EventStream, StreamOutcome};
