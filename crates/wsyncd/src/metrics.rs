use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// # Errors
///
/// Returns an error if binding the metrics HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Connection gauges.
pub mod gauges {
    /// Increment the connected-viewers gauge.
    pub fn inc_viewers_active() {
        metrics::gauge!("wsync_viewers_active").increment(1.0);
    }

    /// Decrement the connected-viewers gauge.
    pub fn dec_viewers_active() {
        metrics::gauge!("wsync_viewers_active").decrement(1.0);
    }

    /// Record whether an authoritative peer is currently connected.
    pub fn set_peer_connected(connected: bool) {
        metrics::gauge!("wsync_peer_connected").set(if connected { 1.0 } else { 0.0 });
    }
}

/// Event counters.
pub mod counters {
    /// Increment the decoded-frames counter.
    pub fn frames_decoded_total() {
        metrics::counter!("wsync_frames_decoded_total").increment(1);
    }

    /// Increment the dropped-frames counter with the given reason label.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("wsync_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the scene-broadcast counter.
    pub fn scene_broadcasts_total() {
        metrics::counter!("wsync_scene_broadcasts_total").increment(1);
    }

    /// Record bytes fanned out to viewers.
    pub fn broadcast_bytes_total(bytes: u64) {
        metrics::counter!("wsync_broadcast_bytes_total").increment(bytes);
    }

    /// Increment the counter of viewer messages dropped for one viewer
    /// during a broadcast, with the given reason label.
    pub fn viewer_sends_dropped_total(reason: &'static str) {
        metrics::counter!("wsync_viewer_sends_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the counter of viewer messages the relay ignored.
    pub fn viewer_messages_ignored_total() {
        metrics::counter!("wsync_viewer_messages_ignored_total").increment(1);
    }

    /// Increment the submitted-edits counter.
    pub fn edits_submitted_total() {
        metrics::counter!("wsync_edits_submitted_total").increment(1);
    }

    /// Increment the forwarded-edits counter with the given trigger label.
    pub fn edits_forwarded_total(trigger: &'static str) {
        metrics::counter!("wsync_edits_forwarded_total", "trigger" => trigger).increment(1);
    }

    /// Increment the dropped-edits counter with the given reason label.
    pub fn edits_dropped_total(reason: &'static str) {
        metrics::counter!("wsync_edits_dropped_total", "reason" => reason).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the time spent inflating one frame payload, in seconds.
    pub fn inflate_seconds(value: f64) {
        metrics::histogram!("wsync_inflate_seconds").record(value);
    }

    /// Record the time spent fanning one document out to viewers.
    pub fn broadcast_fanout_seconds(value: f64) {
        metrics::histogram!("wsync_broadcast_fanout_seconds").record(value);
    }
}
