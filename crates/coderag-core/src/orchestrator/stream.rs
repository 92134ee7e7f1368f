//! Relaying generator fragments to the caller with cancellation.

use std::pin::Pin;
use std::time::Duration;

use coderag_llm::{EmbeddingProvider, TextStream};
use coderag_memory::SemanticCache;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::citations::{extract_references, format_answer, references_suffix};
use super::is_cacheable;
use crate::error::AnswerError;

/// Answer fragments in generation order. Ends after the last fragment, on the
/// first error, or with [`AnswerError::Cancelled`].
///
/// A completed stream concatenates to the same text [`Orchestrator::answer`]
/// returns, including the `References:` section; pass it to
/// [`extract_references`](super::extract_references) for the citation list.
///
/// [`Orchestrator::answer`]: super::Orchestrator::answer
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String, AnswerError>> + Send>>;

const RELAY_BUFFER: usize = 64;
const CANCEL_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a completed streamed answer is cached.
pub(crate) struct CacheSink<E> {
    pub(crate) cache: SemanticCache<E>,
    pub(crate) question: String,
}

impl<E: EmbeddingProvider> CacheSink<E> {
    async fn store(self, raw: &str) {
        let (answer, references) = format_answer(raw);
        if !is_cacheable(&answer) {
            tracing::debug!("streamed answer not cached");
            return;
        }
        if let Err(e) = self.cache.store(&self.question, &answer, &references).await {
            tracing::warn!("failed to cache streamed answer: {e:#}");
        }
    }
}

/// A stream holding one precomputed answer.
pub(crate) fn ready(text: String) -> AnswerStream {
    Box::pin(tokio_stream::once(Ok(text)))
}

/// Forward `inner` to the returned stream from a background task.
///
/// After the last fragment the missing `References:` section is sent as one
/// more fragment. The cache write happens only after the generator finished
/// normally and before the returned stream ends. Cancellation, a generator
/// error, or the caller dropping the stream all skip it.
pub(crate) fn relay<E>(
    mut inner: TextStream,
    cancel: CancellationToken,
    sink: Option<CacheSink<E>>,
) -> AnswerStream
where
    E: EmbeddingProvider + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(received = answer.len(), "answer stream cancelled");
                    notify_cancelled(&tx).await;
                    return;
                }
                next = inner.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    answer.push_str(&fragment);
                    let sent = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            tracing::info!("answer stream cancelled");
                            notify_cancelled(&tx).await;
                            return;
                        }
                        sent = tx.send(Ok(fragment)) => sent,
                    };
                    if sent.is_err() {
                        tracing::info!("answer stream dropped by caller");
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("generation stream failed: {e}");
                    let _ = tx.send(Err(AnswerError::Generation(e))).await;
                    return;
                }
                None => break,
            }
        }
        tracing::debug!(chars = answer.len(), "answer stream completed");

        let refs = extract_references(&answer);
        if let Some(suffix) = references_suffix(&answer, &refs)
            && tx.send(Ok(suffix)).await.is_err()
        {
            tracing::info!("answer stream dropped by caller");
            return;
        }
        if let Some(sink) = sink {
            sink.store(&answer).await;
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Queue the cancellation marker, waiting briefly for room in a full buffer.
async fn notify_cancelled(tx: &mpsc::Sender<Result<String, AnswerError>>) {
    if let Err(e) = tx
        .send_timeout(Err(AnswerError::Cancelled), CANCEL_NOTICE_TIMEOUT)
        .await
    {
        tracing::debug!("cancellation marker not delivered: {e}");
    }
}

#[cfg(test)]
mod tests {
    use coderag_llm::LlmError;
    use coderag_llm::mock::MockEmbedder;

    use super::*;

    fn fragments(parts: &[&str]) -> TextStream {
        let items: Vec<Result<String, LlmError>> =
            parts.iter().map(|p| Ok((*p).to_owned())).collect();
        Box::pin(tokio_stream::iter(items))
    }

    async fn drain(mut stream: AnswerStream) -> (String, Vec<AnswerError>) {
        let mut text = String::new();
        let mut errors = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(t) => text.push_str(&t),
                Err(e) => errors.push(e),
            }
        }
        (text, errors)
    }

    #[tokio::test]
    async fn completed_stream_ends_with_references_section() {
        let raw = ["parse_date parses ", "[node:function:dates.parse_date]."];
        let stream = relay::<MockEmbedder>(fragments(&raw), CancellationToken::new(), None);
        let (text, errors) = drain(stream).await;
        assert!(errors.is_empty());
        assert_eq!(text, format_answer(&raw.concat()).0);
    }

    #[tokio::test]
    async fn cancellation_marker_survives_a_full_buffer() {
        let (inner_tx, inner_rx) = mpsc::channel::<Result<String, LlmError>>(1);
        let cancel = CancellationToken::new();
        let mut stream = relay::<MockEmbedder>(
            Box::pin(ReceiverStream::new(inner_rx)),
            cancel.clone(),
            None,
        );
        for i in 0..RELAY_BUFFER {
            inner_tx.send(Ok(i.to_string())).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item);
        }
        assert!(matches!(last, Some(Err(AnswerError::Cancelled))));
    }
}
