use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the relay daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsyncd")]
#[command(about = "Scene sync relay server")]
#[command(version)]
pub struct Args {
    /// Socket address the authoritative peer connects to.
    #[arg(long, default_value = "0.0.0.0:10006", env = "WSYNCD_PEER_LISTEN")]
    pub peer_listen: SocketAddr,
    /// Socket address viewers connect to (WebSocket).
    #[arg(long, default_value = "0.0.0.0:10005", env = "WSYNCD_VIEWER_LISTEN")]
    pub viewer_listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "WSYNCD_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum forwarded transform edits per second per entity.
    #[arg(long, default_value = "10", env = "WSYNCD_FORWARD_RATE")]
    pub forward_rate: u32,
    /// Outbound queue capacity for the peer connection.
    #[arg(long, default_value = "64", env = "WSYNCD_PEER_QUEUE")]
    pub peer_queue: usize,
    /// Outbound queue capacity per viewer connection.
    #[arg(long, default_value = "256", env = "WSYNCD_VIEWER_QUEUE")]
    pub viewer_queue: usize,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the authoritative peer connects to.
    pub peer_listen: SocketAddr,
    /// Socket address viewers connect to (WebSocket).
    pub viewer_listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum forwarded transform edits per second per entity.
    pub forward_rate: u32,
    /// Outbound queue capacity for the peer connection.
    pub peer_queue: usize,
    /// Outbound queue capacity per viewer connection.
    pub viewer_queue: usize,
}

impl ServerConfig {
    /// Minimum interval between forwarded edits for one entity.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.forward_rate.max(1)))
    }

    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated bound.
    pub fn validate(&self) -> Result<(), String> {
        if self.forward_rate == 0 {
            return Err("forward_rate must be greater than 0".to_string());
        }
        if self.forward_rate > 1_000 {
            return Err("forward_rate exceeds reasonable limit (1000 Hz)".to_string());
        }

        if self.peer_queue == 0 {
            return Err("peer_queue must be greater than 0".to_string());
        }
        if self.peer_queue > 65_536 {
            return Err("peer_queue exceeds reasonable limit (65536)".to_string());
        }

        if self.viewer_queue == 0 {
            return Err("viewer_queue must be greater than 0".to_string());
        }
        if self.viewer_queue > 65_536 {
            return Err("viewer_queue exceeds reasonable limit (65536)".to_string());
        }

        if self.peer_listen == self.viewer_listen {
            return Err("peer_listen and viewer_listen must differ".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            peer_listen: args.peer_listen,
            viewer_listen: args.viewer_listen,
            metrics_addr: args.metrics_addr,
            forward_rate: args.forward_rate,
            peer_queue: args.peer_queue,
            viewer_queue: args.viewer_queue,
        }
    }
}
