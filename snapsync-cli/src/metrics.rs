use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use snapsync_core::{Expectation, ReportOutcome, RoundObserver, RoundSummary};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

lazy_static! {
    pub static ref ROUNDS_ARMED: IntCounter = register_int_counter!(
        "snapsync_rounds_armed_total",
        "Total number of rounds armed at the master"
    )
    .unwrap();
    pub static ref ROUNDS_SATISFIED: IntCounter = register_int_counter!(
        "snapsync_rounds_satisfied_total",
        "Total number of rounds that reached their quorum"
    )
    .unwrap();
    pub static ref REPORTS: IntCounterVec = register_int_counter_vec!(
        "snapsync_reports_total",
        "Completion reports by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref ROUND_DURATION: Histogram = register_histogram!(
        "snapsync_round_duration_seconds",
        "Time from arm to the last completion report",
        vec![0.001, 0.002, 0.005, 0.010, 0.015, 0.020, 0.050, 0.100, 0.500, 1.0, 5.0]
    )
    .unwrap();
}

/// Round observer that records prometheus metrics, then forwards to `inner`.
pub struct MetricsObserver {
    inner: Arc<dyn RoundObserver>,
}

impl MetricsObserver {
    pub fn new(inner: Arc<dyn RoundObserver>) -> Self {
        Self { inner }
    }
}

impl RoundObserver for MetricsObserver {
    fn round_armed(&self, round: u64, expectation: &Expectation) {
        ROUNDS_ARMED.inc();
        self.inner.round_armed(round, expectation);
    }

    fn report_observed(&self, outcome: &ReportOutcome) {
        REPORTS.with_label_values(&[outcome.name()]).inc();
        self.inner.report_observed(outcome);
    }

    fn round_satisfied(&self, summary: &RoundSummary) {
        ROUNDS_SATISFIED.inc();
        ROUND_DURATION.observe(summary.elapsed.as_secs_f64());
        self.inner.round_satisfied(summary);
    }
}

/// Start the metrics server in a background task.
pub fn start_metrics_server(port: u16) {
    // Force initialization of metrics
    lazy_static::initialize(&ROUNDS_ARMED);
    lazy_static::initialize(&ROUNDS_SATISFIED);
    lazy_static::initialize(&REPORTS);
    lazy_static::initialize(&ROUND_DURATION);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!("Metrics server starting on {}", addr);
                loop {
                    if let Ok((mut socket, _)) = listener.accept().await {
                        tokio::spawn(async move {
                            let body = metrics_handler();
                            let response = format!(
                                "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.flush().await;
                        });
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to bind metrics server: {}", e);
            }
        }
    });
}

fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}
