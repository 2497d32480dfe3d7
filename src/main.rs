// ===============================
// src/main.rs
// ===============================
/*
 # smoke checks once running:

 curl -s localhost:8080/healthz
 curl -s localhost:8080/indexes
 curl -s localhost:8080/selftest | python3 -m json.tool

 curl -s localhost:8080/calc -H 'content-type: application/json' -d '{
   "index":"FTSE100","notional":2000000,"marketPrice":9400,"strike":9000,
   "multiplier":10,"feePerContract":10,"rounding":"round",
   "options":[{"expiry":"2025-12","offerPts":163.5}],"currency":"£"
 }'

 curl -s localhost:9898/metrics | grep '^calcs_total'
*/
//
// hedge_calc_rust — stateless downside-hedge cost calculator service.
// Pure arithmetic core (domain), thin adapters around it: JSON + form
// request decoding, a hyper API, Prometheus metrics, and an optional
// JSONL audit recorder.

mod domain;
mod config;
mod metrics;
mod recorder;
mod forms;
mod server;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::recorder::Event;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config & limits ----
    let (args, limits) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        default_index = %args.default_index,
        default_rounding = ?args.default_rounding,
        max_rows = limits.max_rows,
        max_body_bytes = limits.max_body_bytes,
        record_file = ?args.record_file,
        "startup config"
    );
    metrics::CONFIG_API_PORT.set(args.api_port as i64);
    metrics::CONFIG_DEFAULT_INDEX
        .with_label_values(&[&args.default_index])
        .set(1);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let rec_tx = if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
        let _ = rec_tx.try_send(Event::Note("service start".to_string()));
        Some(rec_tx)
    } else {
        None
    };

    // ---- Startup self-check: surface arithmetic drift immediately ----
    let report = domain::run_self_tests();
    if report.ok {
        info!(checks = report.results.len(), "self-test battery passed");
    } else {
        warn!(results = ?report.results, "self-test battery FAILED, serving anyway for diagnosis");
        metrics::SELFTEST_FAILURES.inc();
    }

    // ---- API ----
    server::serve_api(args, limits, rec_tx).await;
}
