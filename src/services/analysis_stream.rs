//! Analysis Call
//!
//! Runs one streaming analysis call to its end, forwarding reasoning and
//! answer text to the caller's update channel as it arrives.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wiki_lens_core::StreamEvent;
use wiki_lens_llm::{AnalysisRequest, AnalysisTransport, EventStream, StreamOutcome, TransportError};

use crate::models::analysis::AnalysisUpdate;

/// Forwards [`AnalysisUpdate`]s upward until the flow is cancelled.
#[derive(Clone)]
pub struct ProgressSink {
    updates: Option<mpsc::Sender<AnalysisUpdate>>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub fn new(updates: Option<mpsc::Sender<AnalysisUpdate>>, cancel: CancellationToken) -> Self {
        Self { updates, cancel }
    }

    /// Deliver `update` unless the flow was cancelled. A closed receiver is
    /// ignored.
    pub async fn send(&self, update: AnalysisUpdate) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(tx) = &self.updates {
            let _ = tx.send(update).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How one analysis call ended.
#[derive(Debug)]
pub(crate) enum CallEnd {
    Completed(String),
    Failed {
        error: TransportError,
        /// Answer text received before the failure
        partial: String,
    },
    Cancelled,
}

/// Open `request` and drain its stream.
///
/// Reasoning is appended to `reasoning`; answer text is collected and
/// returned. The first `content` record marks the end of reasoning.
pub(crate) async fn run_call(
    transport: &dyn AnalysisTransport,
    request: &AnalysisRequest,
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
    sink: &ProgressSink,
    reasoning: &mut String,
) -> CallEnd {
    let body = match cancel.run_until_cancelled(transport.open_analysis(request)).await {
        None => return CallEnd::Cancelled,
        Some(Err(error)) => {
            warn!(error = %error, "analysis stream failed to open");
            return CallEnd::Failed {
                error,
                partial: String::new(),
            };
        }
        Some(Ok(body)) => body,
    };

    let mut events = EventStream::new(body, cancel.clone());
    if let Some(limit) = idle_timeout {
        events = events.with_idle_timeout(limit);
    }

    let mut answer = String::new();
    let mut reasoning_done = false;
    while let Some(event) = events.next_event().await {
        match event {
            StreamEvent::Reasoning { content } => {
                reasoning.push_str(&content);
                sink.send(AnalysisUpdate::Reasoning { content }).await;
            }
            StreamEvent::Content { content } => {
                if !reasoning_done {
                    reasoning_done = true;
                    sink.send(AnalysisUpdate::ReasoningDone).await;
                }
                answer.push_str(&content);
                sink.send(AnalysisUpdate::Content { content }).await;
            }
            StreamEvent::Text { content } => {
                answer.push_str(&content);
                sink.send(AnalysisUpdate::Content { content }).await;
            }
            StreamEvent::Done | StreamEvent::Error { .. } => {}
            other => debug!(?other, "ignoring record in analysis stream"),
        }
    }

    match events.outcome() {
        Some(StreamOutcome::Cancelled) => CallEnd::Cancelled,
        Some(outcome @ StreamOutcome::Failed { .. }) => CallEnd::Failed {
            error: outcome.failure().unwrap_or_else(|| TransportError::StreamFailed {
                message: "analysis stream failed".to_string(),
            }),
            partial: answer,
        },
        _ => CallEnd::Completed(answer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{stream, StreamExt};
    use wiki_lens_llm::{ByteStream, ModelSettings, TransportResult};

    struct Scripted(&'static str);

    #[async_trait]
    impl AnalysisTransport for Scripted {
        async fn open_analysis(&self, _request: &AnalysisRequest) -> TransportResult<ByteStream> {
            Ok(stream::iter(vec![Ok(Bytes::from_static(self.0.as_bytes()))]).boxed())
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(
            &ModelSettings {
                api_key: "sk".into(),
                model: "m".into(),
                max_tokens: 16,
            },
            "{WIKI_TITLE}",
        )
    }

    #[tokio::test]
    async fn test_reasoning_ends_at_first_content() {
        let transport = Scripted(
            "data: {\"type\":\"reasoning\",\"content\":\"a\"}\n\n\
             data: {\"type\":\"content\",\"content\":\"b\"}\n\n\
             data: plain\n\n\
             data: [DONE]\n\n",
        );
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let sink = ProgressSink::new(Some(tx), cancel.clone());
        let mut reasoning = String::new();

        let end = run_call(&transport, &request(), &cancel, None, &sink, &mut reasoning).await;
        drop(sink);

        assert!(matches!(end, CallEnd::Completed(ref answer) if answer == "bplain"));
        assert_eq!(reasoning, "a");

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(
            updates,
            vec![
                AnalysisUpdate::Reasoning { content: "a".into() },
                AnalysisUpdate::ReasoningDone,
                AnalysisUpdate::Content { content: "b".into() },
                AnalysisUpdate::Content { content: "plain".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_error_record_keeps_partial_answer() {
        let transport = Scripted(
            "data: {\"type\":\"content\",\"content\":\"half\"}\n\n\
             data: {\"type\":\"error\",\"message\":\"upstream reset\"}\n\n",
        );
        let cancel = CancellationToken::new();
        let sink = ProgressSink::new(None, cancel.clone());
        let mut reasoning = String::new();

        match run_call(&transport, &request(), &cancel, None, &sink, &mut reasoning).await {
            CallEnd::Failed { error, partial } => {
                assert_eq!(partial, "half");
                assert!(error.to_string().contains("upstream reset"));
            }
            other => panic!("unexpected end: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = ProgressSink::new(None, cancel.clone());
        let mut reasoning = String::new();

        let end = run_call(&Scripted("data: [DONE]\n\n"), &request(), &cancel, None, &sink, &mut reasoning).await;
        assert!(matches!(end, CallEnd::Cancelled));
    }
}
