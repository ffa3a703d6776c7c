use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::coalesce::TransformCoalescer;
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::peer::{handle_peer, PeerSlot};
use crate::viewers::{handle_viewer, ViewerRegistry};

/// Shared state wired between the two listeners.
pub struct ServerState {
    /// Runtime configuration.
    pub config: ServerConfig,
    /// Connected viewers.
    pub viewers: Arc<ViewerRegistry>,
    /// The at-most-one authoritative peer.
    pub peer: Arc<PeerSlot>,
    /// Edit throttle, delivering into the peer slot.
    pub coalescer: TransformCoalescer,
}

impl ServerState {
    /// Builds the state graph for one relay instance.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let peer = Arc::new(PeerSlot::new());
        let coalescer =
            TransformCoalescer::new(Arc::clone(&peer) as Arc<_>, config.min_interval());
        Self {
            config,
            viewers: Arc::new(ViewerRegistry::new()),
            peer,
            coalescer,
        }
    }
}

/// # Errors
///
/// Returns an error if either accept loop encounters an I/O failure.
pub async fn run(
    peer_listener: TcpListener,
    viewer_listener: TcpListener,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(peer_listener, viewer_listener, state, shutdown_tx).await
}

/// Run both accept loops with an externally-controlled shutdown signal.
///
/// When any clone of `shutdown_tx` sends, the accept loops stop accepting
/// new connections, buffered edits are discarded, and in-flight
/// connections get a grace period to finish.
///
/// # Errors
///
/// Returns an error if a listener's local address cannot be read.
pub async fn run_with_shutdown(
    peer_listener: TcpListener,
    viewer_listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), RelayError> {
    info!(
        "relay listening: peer on {}, viewers on {}",
        peer_listener.local_addr().map_err(RelayError::Io)?,
        viewer_listener.local_addr().map_err(RelayError::Io)?
    );
    let mut shutdown_rx = shutdown_tx.subscribe();
    let task_tracker = Arc::new(tokio::sync::Notify::new());
    // Tasks decrement this themselves before notifying, so connections
    // that finish before the shutdown signal are already accounted for.
    let active_tasks = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            result = peer_listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let slot = Arc::clone(&state.peer);
                        let viewers = Arc::clone(&state.viewers);
                        let coalescer = state.coalescer.clone();
                        let queue = state.config.peer_queue;
                        let tracker = task_tracker.clone();
                        let active = Arc::clone(&active_tasks);
                        active.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            handle_peer(stream, addr, slot, viewers, coalescer, queue).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            tracker.notify_one();
                        });
                    }
                    Err(e) => {
                        error!("failed to accept peer connection: {}", e);
                    }
                }
            }
            result = viewer_listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let registry = Arc::clone(&state.viewers);
                        let coalescer = state.coalescer.clone();
                        let queue = state.config.viewer_queue;
                        let tracker = task_tracker.clone();
                        let active = Arc::clone(&active_tasks);
                        active.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_viewer(stream, addr, registry, coalescer, queue).await
                            {
                                tracing::debug!("viewer connection from {} closed: {}", addr, e);
                            }
                            active.fetch_sub(1, Ordering::SeqCst);
                            tracker.notify_one();
                        });
                    }
                    Err(e) => {
                        error!("failed to accept viewer connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!(
                    "shutdown signal received, draining {} connections",
                    active_tasks.load(Ordering::SeqCst)
                );
                break;
            }
        }
    }

    state.coalescer.flush_all();

    // Wait for in-flight connections to finish (with timeout)
    let drain_timeout = std::time::Duration::from_secs(30);
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while active_tasks.load(Ordering::SeqCst) > 0 {
        if tokio::time::timeout_at(deadline, task_tracker.notified())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active",
                active_tasks.load(Ordering::SeqCst)
            );
            break;
        }
    }

    info!("relay shut down gracefully");
    Ok(())
}
