//! Server-Sent Events framing over a fanout subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::web::Bytes;
use concord_core::TopologyEvent;
use futures_util::Stream;
use tokio::sync::mpsc;

/// Encode one event as an SSE frame:
/// `id: <version>\nevent: <Type>\ndata: <json>\n\n`.
#[must_use]
pub fn frame(event: &TopologyEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.version, event.event_type, data
    ))
}

/// Streaming body over a subscription channel. Ends when the fanout
/// closes the channel (unsubscribe, eviction or shutdown).
pub struct EventStream {
    receiver: mpsc::Receiver<TopologyEvent>,
}

impl EventStream {
    /// Wrap a subscription receiver.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<TopologyEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for EventStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(frame(&event)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::TopologyEventType;
    use futures_util::StreamExt;

    #[test]
    fn test_frame_layout() {
        let event = TopologyEvent::new(TopologyEventType::ShardAdd, 12).with_shard("s1");
        let bytes = frame(&event);
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.starts_with("id: 12\nevent: ShardAdd\ndata: "));
        assert!(text.ends_with("\n\n"));

        let data_line = text.lines().nth(2).unwrap().strip_prefix("data: ").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(data_line).unwrap();
        assert_eq!(parsed["shardId"], "s1");
        assert_eq!(parsed["type"], "ShardAdd");
    }

    #[tokio::test]
    async fn test_stream_ends_on_channel_close() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(TopologyEvent::new(TopologyEventType::NodeJoin, 1)).await.unwrap();
        drop(tx);

        let mut stream = EventStream::new(rx);
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"id: 1\n"));
        assert!(stream.next().await.is_none());
    }
}
