use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wsync_common::{frame, FrameDecoder, TransformEdit, ViewerMessage};

use crate::coalesce::{EditSink, TransformCoalescer};
use crate::error::RelayError;
use crate::metrics::{counters, gauges, histograms};
use crate::viewers::ViewerRegistry;

const READ_BUF_BYTES: usize = 64 * 1024;

/// Handle to the live authoritative peer connection.
pub struct PeerHandle {
    /// Outbound frames, already length-prefixed.
    tx: mpsc::Sender<Vec<u8>>,
    /// Remote address, for logs.
    pub addr: SocketAddr,
    /// When this connection was installed. Used to guard teardown so a
    /// replacement connection is never cleared by its predecessor.
    pub connected_at: Instant,
}

/// Holder for the at-most-one peer connection.
///
/// A new peer connection replaces the current one; the displaced
/// connection's outbound channel closes, which unwinds its handler task.
#[derive(Default)]
pub struct PeerSlot {
    current: Mutex<Option<PeerHandle>>,
}

impl PeerSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle` as the live connection, returning the displaced
    /// one if the slot was occupied.
    pub fn install(&self, handle: PeerHandle) -> Option<PeerHandle> {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        slot.replace(handle)
    }

    /// Clears the slot only if it still holds the connection installed at
    /// `connected_at`. A handler that has already been replaced must not
    /// tear down its successor.
    pub fn clear_if(&self, connected_at: Instant) -> bool {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(handle) if handle.connected_at == connected_at => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a peer is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Serializes `edit` under its `transform_update` envelope and queues
    /// it on the live connection. The peer dispatches on the `type` field.
    ///
    /// Returns `false` when no peer is connected or its queue is full.
    pub fn forward(&self, edit: &TransformEdit) -> bool {
        let message = ViewerMessage::TransformUpdate(edit.clone());
        let payload = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize edit");
                return false;
            }
        };
        let framed = frame::encode(payload.as_bytes());

        let slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = slot.as_ref() else {
            return false;
        };
        match handle.tx.try_send(framed) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(entity = %edit.object_name, "peer queue full, edit dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl EditSink for PeerSlot {
    fn deliver(&self, edit: &TransformEdit) -> bool {
        self.forward(edit)
    }
}

/// Drives one authoritative peer connection to completion.
///
/// Reads length-prefixed zlib frames, inflates them, and fans the JSON
/// text out to all viewers. Writes queued (uncompressed) frames back to
/// the peer. Exits when the socket closes, the frame stream is violated,
/// or a newer peer connection displaces this one.
pub async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    slot: Arc<PeerSlot>,
    viewers: Arc<ViewerRegistry>,
    coalescer: TransformCoalescer,
    queue_capacity: usize,
) {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(queue_capacity);
    let connected_at = Instant::now();

    if let Some(displaced) = slot.install(PeerHandle {
        tx,
        addr,
        connected_at,
    }) {
        info!(old = %displaced.addr, new = %addr, "peer replaced");
    } else {
        info!(%addr, "peer connected");
    }
    gauges::set_peer_connected(true);

    if let Err(err) = peer_loop(stream, rx, &viewers).await {
        match err {
            RelayError::ConnectionClosed => info!(%addr, "peer disconnected"),
            err => warn!(%addr, error = %err, "peer connection failed"),
        }
    }

    // Only tear down shared state if we are still the live connection.
    if slot.clear_if(connected_at) {
        gauges::set_peer_connected(false);
        coalescer.flush_all();
    }
}

async fn peer_loop(
    mut stream: TcpStream,
    mut rx: mpsc::Receiver<Vec<u8>>,
    viewers: &ViewerRegistry,
) -> Result<(), RelayError> {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_BYTES];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(RelayError::ConnectionClosed);
                }
                decoder.extend(&buf[..n]);
                drain_frames(&mut decoder, viewers);
            }
            outbound = rx.recv() => {
                // Channel closes when a newer connection takes the slot.
                let Some(framed) = outbound else {
                    return Ok(());
                };
                stream.write_all(&framed).await?;
            }
        }
    }
}

fn drain_frames(decoder: &mut FrameDecoder, viewers: &ViewerRegistry) {
    loop {
        let payload = match decoder.next_frame() {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(err) => {
                // The decoder has already discarded its buffer; the
                // connection stays open and decoding resumes at the next
                // length boundary the peer writes.
                counters::frames_dropped_total("length");
                warn!(error = %err, "frame protocol violation, buffer reset");
                return;
            }
        };
        counters::frames_decoded_total();

        let started = std::time::Instant::now();
        let text = match wsync_common::inflate(&payload) {
            Ok(text) => text,
            Err(err) => {
                // A bad payload is dropped; the frame boundary itself
                // was sound so the stream stays usable.
                counters::frames_dropped_total("inflate");
                warn!(error = %err, bytes = payload.len(), "dropping undecodable frame");
                continue;
            }
        };
        histograms::inflate_seconds(started.elapsed().as_secs_f64());

        let fanout_started = std::time::Instant::now();
        let delivered = viewers.broadcast(&text);
        histograms::broadcast_fanout_seconds(fanout_started.elapsed().as_secs_f64());
        counters::scene_broadcasts_total();
        counters::broadcast_bytes_total((text.len() * delivered) as u64);
        debug!(bytes = text.len(), viewers = delivered, "scene frame relayed");
    }
}
