use chatrelay_agents::FragmentStream;
use chatrelay_common::{Message, Result};
use chatrelay_store::ThreadHandle;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sse::normalize_line_breaks;

/// How a relayed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Every fragment was delivered and the assistant message was stored.
    Completed,
    /// The client went away. Nothing was stored.
    Cancelled,
    /// The fragment source failed. The error was forwarded, nothing was stored.
    Failed,
}

/// Forwards fragments to the client connection while accumulating them for
/// the thread.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    capacity: usize,
}

impl StreamRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    /// Drive `fragments` on a background task. The receiver yields each
    /// fragment as it is produced and closes once the turn is over; on
    /// natural completion the concatenated text has already been appended to
    /// `thread` with `response_id` by then.
    ///
    /// Dropping the receiver cancels the turn.
    pub fn relay(
        &self,
        fragments: FragmentStream,
        response_id: String,
        thread: ThreadHandle,
    ) -> (mpsc::Receiver<Result<String>>, JoinHandle<RelayOutcome>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = tokio::spawn(async move {
            let mut fragments = fragments;
            let mut accumulated = String::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        debug!(%response_id, "client disconnected, dropping turn");
                        return RelayOutcome::Cancelled;
                    }
                    next = fragments.next() => next,
                };

                match next {
                    Some(Ok(fragment)) => {
                        let fragment = normalize_line_breaks(fragment);
                        accumulated.push_str(&fragment);
                        if tx.send(Ok(fragment)).await.is_err() {
                            debug!(%response_id, "client disconnected, dropping turn");
                            return RelayOutcome::Cancelled;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%response_id, "turn failed mid-stream: {e}");
                        let _ = tx.send(Err(e)).await;
                        return RelayOutcome::Failed;
                    }
                    None => break,
                }
            }

            info!(%response_id, chars = accumulated.len(), "turn complete");
            thread
                .append(Message::assistant(accumulated, Some(response_id)))
                .await;
            RelayOutcome::Completed
        });

        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_common::{ConversationMode, Error, Role, ThreadId};
    use chatrelay_store::{ConversationStore, ThreadSeed};
    use std::time::Duration;

    fn thread() -> ThreadHandle {
        let store = ConversationStore::default();
        store.get_or_create(&ThreadId::new("t"), || ThreadSeed {
            mode: ConversationMode::General,
            system_prompt: "sys".to_string(),
        })
    }

    fn fragments(items: Vec<Result<String>>) -> FragmentStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn forwards_fragments_then_persists_concatenation() {
        let thread = thread();
        let relay = StreamRelay::new(8);

        let (mut rx, handle) = relay.relay(
            fragments(vec![Ok("Hel".to_string()), Ok("lo".to_string())]),
            "r1".to_string(),
            thread.clone(),
        );

        assert_eq!(rx.recv().await.unwrap().unwrap(), "Hel");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "lo");
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);

        let messages = thread.messages().await;
        assert_eq!(messages.len(), 2);
        let last = &messages[1];
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content.as_text(), "Hello");
        assert_eq!(last.id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn source_error_is_forwarded_and_nothing_persisted() {
        let thread = thread();
        let relay = StreamRelay::new(8);

        let (mut rx, handle) = relay.relay(
            fragments(vec![
                Ok("partial".to_string()),
                Err(Error::Provider("connection reset".to_string())),
            ]),
            "r1".to_string(),
            thread.clone(),
        );

        assert_eq!(rx.recv().await.unwrap().unwrap(), "partial");
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), RelayOutcome::Failed);
        assert_eq!(thread.len().await, 1);
    }

    #[tokio::test]
    async fn client_disconnect_cancels_without_persisting() {
        let thread = thread();
        let relay = StreamRelay::new(1);
        let source = async_stream::stream! {
            yield Ok("first".to_string());
            tokio::time::sleep(Duration::from_secs(30)).await;
            yield Ok("never".to_string());
        };

        let (mut rx, handle) = relay.relay(Box::pin(source), "r1".to_string(), thread.clone());
        assert_eq!(rx.recv().await.unwrap().unwrap(), "first");
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert_eq!(thread.len().await, 1);
    }

    #[tokio::test]
    async fn stored_text_uses_client_line_breaks() {
        let thread = thread();
        let relay = StreamRelay::new(8);

        let (mut rx, handle) = relay.relay(
            fragments(vec![Ok("a\rb".to_string()), Ok("\r\nc".to_string())]),
            "r1".to_string(),
            thread.clone(),
        );

        assert_eq!(rx.recv().await.unwrap().unwrap(), "a\nb");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "\nc");
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);

        let messages = thread.messages().await;
        assert_eq!(messages[1].content.as_text(), "a\nb\nc");
    }
}
