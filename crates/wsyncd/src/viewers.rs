use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use wsync_common::ViewerMessage;

use crate::coalesce::TransformCoalescer;
use crate::error::RelayError;
use crate::metrics::{counters, gauges};

/// Opaque per-connection viewer id.
pub type ViewerId = u64;

struct ViewerEntry {
    tx: mpsc::Sender<String>,
    addr: SocketAddr,
}

/// The set of connected viewers.
///
/// Broadcast never blocks on a slow viewer: a full outbound queue means
/// that viewer misses the document, everyone else still gets it.
#[derive(Default)]
pub struct ViewerRegistry {
    viewers: DashMap<ViewerId, ViewerEntry>,
    next_id: AtomicU64,
}

impl ViewerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a viewer's outbound channel, returning its id.
    pub fn register(&self, tx: mpsc::Sender<String>, addr: SocketAddr) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers.insert(id, ViewerEntry { tx, addr });
        gauges::inc_viewers_active();
        id
    }

    /// Removes a viewer. Idempotent; a viewer already gone is a no-op.
    pub fn unregister(&self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            gauges::dec_viewers_active();
        }
    }

    /// Number of connected viewers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    /// Whether no viewers are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Queues `text` to every connected viewer, returning how many
    /// accepted it. Viewers whose channel has closed are dropped from
    /// the registry here rather than waiting for their task to exit.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.viewers.iter() {
            match entry.tx.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counters::viewer_sends_dropped_total("full");
                    debug!(viewer = %entry.addr, "viewer queue full, frame skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    counters::viewer_sends_dropped_total("closed");
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.unregister(id);
        }
        delivered
    }
}

/// Drives one viewer WebSocket connection to completion.
///
/// Inbound text frames are parsed as viewer messages; transform edits go
/// to the coalescer and anything unrecognized is logged and dropped.
/// Outbound scene documents arrive on the registry channel.
///
/// # Errors
///
/// Returns a [`RelayError`] when the handshake or a transport operation
/// fails; the viewer is unregistered either way.
pub async fn handle_viewer(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ViewerRegistry>,
    coalescer: TransformCoalescer,
    queue_capacity: usize,
) -> Result<(), RelayError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;

    let (tx, rx) = mpsc::channel::<String>(queue_capacity);
    let id = registry.register(tx, addr);
    info!(%addr, viewer = id, "viewer connected");

    let result = viewer_loop(ws, addr, rx, &coalescer).await;

    registry.unregister(id);
    info!(%addr, viewer = id, "viewer disconnected");
    result
}

async fn viewer_loop(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    addr: SocketAddr,
    mut rx: mpsc::Receiver<String>,
    coalescer: &TransformCoalescer,
) -> Result<(), RelayError> {
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else { return Ok(()) };
                sink.send(Message::Text(text)).await?;
            }
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_viewer_text(&text, addr, coalescer);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {
                        // binary / pong frames carry nothing we use
                        counters::viewer_messages_ignored_total();
                    }
                    Some(Err(err)) => return Err(err.into()),
                }
            }
        }
    }
}

fn handle_viewer_text(text: &str, addr: SocketAddr, coalescer: &TransformCoalescer) {
    match ViewerMessage::parse(text) {
        Ok(ViewerMessage::TransformUpdate(edit)) => {
            coalescer.submit(edit);
        }
        Err(err) => {
            counters::viewer_messages_ignored_total();
            debug!(%addr, error = %err, "ignoring unrecognized viewer message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn broadcast_reaches_all_viewers() {
        let registry = ViewerRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        registry.register(tx1, test_addr(1));
        registry.register(tx2, test_addr(2));

        assert_eq!(registry.broadcast("{\"objects\":[]}"), 2);
        assert_eq!(rx1.recv().await.unwrap(), "{\"objects\":[]}");
        assert_eq!(rx2.recv().await.unwrap(), "{\"objects\":[]}");
    }

    #[tokio::test]
    async fn closed_viewer_does_not_block_others() {
        let registry = ViewerRegistry::new();
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        registry.register(tx1, test_addr(1));
        let keep = registry.register(tx2, test_addr(2));
        drop(rx1);

        assert_eq!(registry.broadcast("doc"), 1);
        assert_eq!(rx2.recv().await.unwrap(), "doc");
        // the dead viewer was pruned during broadcast
        assert_eq!(registry.len(), 1);
        registry.unregister(keep);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn full_queue_skips_without_unregistering() {
        let registry = ViewerRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(tx, test_addr(1));

        assert_eq!(registry.broadcast("one"), 1);
        assert_eq!(registry.broadcast("two"), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(rx.recv().await.unwrap(), "one");
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ViewerRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx, test_addr(1));
        registry.unregister(id);
        registry.unregister(id);
        assert!(registry.is_empty());
    }
}
