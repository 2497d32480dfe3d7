// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Core calculator metrics --------
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "API requests (labels: endpoint, status)"),
        &["endpoint", "status"],
    )
    .unwrap()
});

pub static CALCS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("calcs_total", "hedge calculations served").unwrap());

pub static EXPORTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("exports_total", "export payloads served").unwrap());

pub static SELFTEST_RUNS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("selftest_runs_total", "self-test battery runs").unwrap());

pub static SELFTEST_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("selftest_failures_total", "self-test runs that reported ok=false").unwrap()
});

// Option rows per calculation request
pub static CALC_ROWS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("calc_option_rows", "option rows per calculation")
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0]),
    )
    .unwrap()
});

// ---- Config visibility (ports / default index) ----
pub static CONFIG_API_PORT: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_api_port", "configured API port").unwrap());

pub static CONFIG_DEFAULT_INDEX: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_default_index", "configured default index (label: index)"),
        &["index"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(HTTP_REQUESTS.clone())),
        REGISTRY.register(Box::new(CALCS.clone())),
        REGISTRY.register(Box::new(EXPORTS.clone())),
        REGISTRY.register(Box::new(SELFTEST_RUNS.clone())),
        REGISTRY.register(Box::new(SELFTEST_FAILURES.clone())),
        REGISTRY.register(Box::new(CALC_ROWS.clone())),
        REGISTRY.register(Box::new(CONFIG_API_PORT.clone())),
        REGISTRY.register(Box::new(CONFIG_DEFAULT_INDEX.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
