use thiserror::Error;

/// Errors that end one relay connection.
///
/// Protocol violations inside a healthy transport (bad length prefix,
/// undecodable payload) are handled at the read loop and never reach this
/// type; nothing here propagates far enough to take the process down.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Underlying I/O error on the peer TCP stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket transport error on a viewer connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The connection was closed by the remote side.
    #[error("connection closed")]
    ConnectionClosed,
}
