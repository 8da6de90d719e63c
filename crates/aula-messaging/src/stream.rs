//! Adapters from broadcast channels to async streams.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::broadcast;
use tracing::debug;

/// Boxed, sendable stream.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Convert a broadcast receiver into a stream.
///
/// A lagging receiver skips what it missed and keeps going; the stream ends
/// when every sender is gone.
pub fn broadcast_to_stream<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(item) => yield item,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Broadcast stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<u32>(16);
        let stream = broadcast_to_stream(rx);

        tx.send(7).unwrap();
        tx.send(8).unwrap();
        drop(tx);

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_lag_skips_missed_items() {
        let (tx, rx) = broadcast::channel::<u32>(2);
        let stream = broadcast_to_stream(rx);

        for n in 0..5 {
            tx.send(n).unwrap();
        }
        drop(tx);

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![3, 4]);
    }
}
