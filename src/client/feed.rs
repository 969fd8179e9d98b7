//! Client side of the change feed.

use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use tokio_stream::wrappers::BroadcastStream;

use crate::{client::InviteError, dto::feed::ChangeEvent, state::SharedState};

/// Stream of every invitation change. Dropping it unsubscribes.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, InviteError>>;

/// Push transport delivering invitation inserts and updates, unfiltered.
///
/// Delivery is at least once at best; events emitted while no stream is open are lost.
pub trait ChangeFeed: Send + Sync {
    /// Open a new subscription.
    fn subscribe(&self) -> BoxFuture<'static, Result<ChangeStream, InviteError>>;
}

/// Subscribes directly to a server's in-process feed hub.
#[derive(Clone)]
pub struct LocalChangeFeed {
    state: SharedState,
}

impl LocalChangeFeed {
    /// Attach to the hub of `state`.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self) -> BoxFuture<'static, Result<ChangeStream, InviteError>> {
        let receiver = self.state.feed().subscribe();
        Box::pin(async move {
            let stream = BroadcastStream::new(receiver).map(|item| {
                item.map_err(|err| InviteError::Transport(format!("change feed: {err}")))
            });
            Ok(stream.boxed())
        })
    }
}

/// One dispatched Server-Sent Events frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field.
    pub event: Option<String>,
    /// `data:` lines joined with newlines.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame they complete. Comment-only frames
    /// (keep-alives) yield nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self
            .buffer
            .windows(2)
            .position(|window| window == b"\n\n")
        {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => frame.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

#[cfg(feature = "http-client")]
pub use self::sse::SseChangeFeed;

#[cfg(feature = "http-client")]
mod sse {
    use std::sync::Arc;

    use async_stream::stream;
    use futures::{StreamExt, future::BoxFuture};
    use reqwest::{Client, header::ACCEPT};
    use tracing::{debug, warn};

    use super::{ChangeFeed, ChangeStream, SseDecoder};
    use crate::{
        client::InviteError,
        dto::feed::{ChangeEvent, EVENT_INVITATION_INSERT, EVENT_INVITATION_UPDATE},
    };

    const FEED_PATH: &str = "/feed/invitations";

    /// Subscribes to `GET /feed/invitations` of a remote server.
    #[derive(Clone)]
    pub struct SseChangeFeed {
        client: Client,
        base_url: Arc<str>,
    }

    impl SseChangeFeed {
        /// Target the server rooted at `base_url`.
        pub fn new(client: Client, base_url: &str) -> Self {
            Self {
                client,
                base_url: Arc::from(base_url.trim_end_matches('/')),
            }
        }
    }

    impl ChangeFeed for SseChangeFeed {
        fn subscribe(&self) -> BoxFuture<'static, Result<ChangeStream, InviteError>> {
            let request = self
                .client
                .get(format!("{}{}", self.base_url, FEED_PATH))
                .header(ACCEPT, "text/event-stream");

            Box::pin(async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(InviteError::Transport(format!(
                        "feed subscription refused with {}",
                        response.status()
                    )));
                }

                let mut body = response.bytes_stream();
                let events = stream! {
                    let mut decoder = SseDecoder::new();
                    while let Some(chunk) = body.next().await {
                        let chunk = match chunk {
                            Ok(chunk) => chunk,
                            Err(err) => {
                                yield Err(InviteError::from(err));
                                break;
                            }
                        };

                        for frame in decoder.push(&chunk) {
                            match frame.event.as_deref() {
                                Some(EVENT_INVITATION_INSERT) | Some(EVENT_INVITATION_UPDATE) => {
                                    match serde_json::from_str::<ChangeEvent>(&frame.data) {
                                        Ok(event) => yield Ok(event),
                                        Err(err) => warn!(error = %err, "undecodable feed event"),
                                    }
                                }
                                other => debug!(event = ?other, "ignoring feed frame"),
                            }
                        }
                    }
                    yield Err(InviteError::Transport("feed stream closed by server".into()));
                };

                Ok(events.boxed())
            })
        }
    }
}
