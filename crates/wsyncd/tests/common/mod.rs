use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use wsync_common::inflate::deflate;
use wsyncd::config::ServerConfig;
use wsyncd::ServerState;

pub fn test_config(peer_listen: SocketAddr, viewer_listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        peer_listen,
        viewer_listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        forward_rate: 10,
        peer_queue: 64,
        viewer_queue: 256,
    }
}

/// Binds both listeners on ephemeral ports and spawns the relay.
pub async fn start_server() -> (SocketAddr, SocketAddr, Arc<ServerState>) {
    start_server_with_rate(10).await
}

pub async fn start_server_with_rate(
    forward_rate: u32,
) -> (SocketAddr, SocketAddr, Arc<ServerState>) {
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let viewer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let viewer_addr = viewer_listener.local_addr().unwrap();

    let mut config = test_config(peer_addr, viewer_addr);
    config.forward_rate = forward_rate;
    let state = Arc::new(ServerState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = wsyncd::run(peer_listener, viewer_listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (peer_addr, viewer_addr, state)
}

/// Like [`start_server`] but exposes the shutdown channel and the run
/// task, for drain tests.
pub async fn start_server_with_shutdown() -> (
    SocketAddr,
    SocketAddr,
    Arc<ServerState>,
    tokio::sync::watch::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let viewer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let viewer_addr = viewer_listener.local_addr().unwrap();

    let state = Arc::new(ServerState::new(test_config(peer_addr, viewer_addr)));

    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    let run_tx = shutdown_tx.clone();
    let state_clone = state.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) =
            wsyncd::run_with_shutdown(peer_listener, viewer_listener, state_clone, run_tx).await
        {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (peer_addr, viewer_addr, state, shutdown_tx, handle)
}

/// Stand-in for the authoritative peer: raw framed TCP.
pub struct TestPeer {
    stream: TcpStream,
}

impl TestPeer {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream }
    }

    /// Sends one scene document the way the real peer does: zlib-deflated
    /// behind a big-endian length prefix.
    pub async fn send_scene(&mut self, json: &str) {
        let compressed = deflate(json);
        self.send_raw_frame(&compressed).await;
    }

    /// Sends an arbitrary payload behind a length prefix.
    pub async fn send_raw_frame(&mut self, payload: &[u8]) {
        let len = u32::try_from(payload.len()).unwrap();
        self.stream.write_all(&len.to_be_bytes()).await.unwrap();
        self.stream.write_all(payload).await.unwrap();
    }

    /// Writes raw bytes with no framing, for split-delivery tests.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Reads one forwarded frame off the socket. Forwarded edits are
    /// plain JSON, not compressed.
    pub async fn recv_forwarded(&mut self) -> serde_json::Value {
        let mut header = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut header))
            .await
            .expect("timeout waiting for forwarded frame")
            .unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    /// Like [`recv_forwarded`], but yields `None` on timeout or when the
    /// relay has closed this connection (e.g. a displaced peer).
    pub async fn recv_forwarded_timeout(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        let read = async {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await.ok()?;
            let len = u32::from_be_bytes(header) as usize;
            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload).await.ok()?;
            Some(serde_json::from_slice(&payload).unwrap())
        };
        tokio::time::timeout(timeout, read).await.ok().flatten()
    }
}

/// Stand-in for a browser viewer: WebSocket text frames.
pub struct TestViewer {
    ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestViewer {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_transform(&mut self, object_name: &str, x: f64) {
        let msg = serde_json::json!({
            "type": "transform_update",
            "objectName": object_name,
            "position": [x, 0.0, 0.0],
            "rotation": [0.0, 0.0, 0.0],
            "scale": [1.0, 1.0, 1.0],
            "timestamp": x,
        });
        self.send_text(&msg.to_string()).await;
    }

    pub async fn recv_text(&mut self) -> String {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for viewer message")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return text,
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_text_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.recv_text()).await.ok()
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}
