use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{dto::feed::ChangeEvent, state::SharedState};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Subscribe to the unfiltered invitation change feed.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<ChangeEvent> {
    state.feed().subscribe()
}

/// Convert a feed receiver into an SSE response, forwarding events until the
/// client disconnects or falls behind the broadcast buffer.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ChangeEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(change) => {
                            let payload = match change.to_server_event() {
                                Ok(payload) => payload,
                                Err(err) => {
                                    warn!(id = %change.row.id, error = %err, "failed to encode invitation change");
                                    continue;
                                }
                            };

                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Closing the stream is the only way a remote subscriber
                            // learns it missed events; it resubscribes and re-fetches.
                            warn!(skipped, "feed subscriber lagged; closing stream");
                            break;
                        }
                    }
                }
            }
        }

        info!("invitation feed stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, response::IntoResponse};

    use super::*;
    use crate::{
        config::AppConfig,
        dto::feed::EVENT_INVITATION_INSERT,
        state::{AppState, invitation::Invitation},
    };

    #[tokio::test]
    async fn forwards_events_as_named_frames() {
        let state = AppState::new(AppConfig::default());
        let receiver = subscribe(&state);
        let invitation = Invitation::new_pending("alice", "bob");
        state.feed().publish(ChangeEvent::insert(invitation.clone()));
        drop(state);

        let body = to_sse_stream(receiver).into_response().into_body();
        let bytes = tokio::time::timeout(Duration::from_secs(5), to_bytes(body, usize::MAX))
            .await
            .expect("stream did not end")
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains(EVENT_INVITATION_INSERT));
        assert!(text.contains(&invitation.id.to_string()));
    }

    #[tokio::test]
    async fn lagging_subscriber_stream_is_closed() {
        let state = AppState::new(AppConfig {
            feed_capacity: 1,
            ..AppConfig::default()
        });
        let receiver = subscribe(&state);
        for _ in 0..3 {
            state
                .feed()
                .publish(ChangeEvent::insert(Invitation::new_pending("alice", "bob")));
        }

        // The hub is still alive, so only the lag can end the stream.
        let body = to_sse_stream(receiver).into_response().into_body();
        let ended = tokio::time::timeout(Duration::from_secs(5), to_bytes(body, usize::MAX)).await;
        assert!(ended.is_ok(), "stream stayed open after lag");
        assert_eq!(state.feed().subscriber_count(), 0);
    }
}
