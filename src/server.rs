// ===============================
// src/server.rs
// ===============================
//
// JSON API over hyper. Routes:
//   GET  /healthz    -> {"ok": true}
//   GET  /indexes    -> preset index table
//   POST /calc       -> HedgeInputs (JSON) -> CalculationResult
//   POST /calc/form  -> urlencoded form (expiry[]/offerPts[]) -> CalculationResult
//   POST /export     -> {"inputs": ..., "notes": ...} -> ExportPayload
//   GET  /selftest   -> golden-value self-test report
//
// Adapter faults (bad JSON, oversized body, row cap) map to 4xx JSON
// {"error": ...}. The calc core never produces an error.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hyper::body::{Bytes, HttpBody};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{Args, Limits};
use crate::domain::{self, CalculationResult, HedgeInputs};
use crate::forms;
use crate::metrics::{CALCS, CALC_ROWS, EXPORTS, HTTP_REQUESTS, SELFTEST_FAILURES, SELFTEST_RUNS};
use crate::recorder::{CalcEvent, Event};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed JSON body: {0}")]
    BadJson(String),
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("request body too large (limit {0} bytes)")]
    BodyTooLarge(usize),
    #[error("too many option rows (limit {0})")]
    TooManyRows(usize),
    #[error("no route for {0} {1}")]
    NotFound(Method, String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadJson(_) | ApiError::Body(_) => StatusCode::BAD_REQUEST,
            ApiError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRows(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    inputs: HedgeInputs,
    #[serde(default)]
    notes: String,
}

pub struct Ctx {
    pub args: Args,
    pub limits: Limits,
    pub rec_tx: Option<mpsc::Sender<Event>>,
}

fn next_req_id() -> String {
    let now: i128 = Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128;
    format!("REQ-{}-{}", now, rand::thread_rng().gen::<u32>())
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn ok_json<T: Serialize>(value: &T) -> Result<Response<Body>, ApiError> {
    Ok(json_response(StatusCode::OK, value))
}

// Bounded endpoint label so unknown paths cannot blow up metric cardinality
fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/healthz" => "healthz",
        "/indexes" => "indexes",
        "/calc" => "calc",
        "/calc/form" => "calc_form",
        "/export" => "export",
        "/selftest" => "selftest",
        _ => "other",
    }
}

/// Buffer a request body, enforcing the size cap while streaming so an
/// oversized POST is rejected without ever being held fully in memory.
async fn read_body(mut body: Body, cap: usize) -> Result<Bytes, ApiError> {
    // Content-Length (when present) lets us bail before reading anything
    if body.size_hint().lower() > cap as u64 {
        return Err(ApiError::BodyTooLarge(cap));
    }
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| ApiError::Body(e.to_string()))?;
        if buf.len() + chunk.len() > cap {
            return Err(ApiError::BodyTooLarge(cap));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn record(ctx: &Ctx, ev: Event) {
    if let Some(tx) = &ctx.rec_tx {
        let _ = tx.try_send(ev);
    }
}

/// Shared tail of /calc and /calc/form: cap check, compute, log, audit.
fn serve_calc(ctx: &Ctx, inputs: &HedgeInputs) -> Result<CalculationResult, ApiError> {
    if inputs.options.len() > ctx.limits.max_rows {
        return Err(ApiError::TooManyRows(ctx.limits.max_rows));
    }
    let result = domain::compute_result(inputs);
    CALCS.inc();
    CALC_ROWS.observe(result.rows.len() as f64);

    let req_id = next_req_id();
    info!(
        %req_id,
        index = %inputs.index,
        contracts = result.summary.contracts,
        rows = result.rows.len(),
        "calc served"
    );
    record(
        ctx,
        Event::Calc(CalcEvent {
            req_id,
            ts_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128,
            index: inputs.index.clone(),
            contracts: result.summary.contracts,
            rows: result.rows.len(),
        }),
    );
    Ok(result)
}

async fn route(req: Request<Body>, ctx: &Ctx) -> Result<Response<Body>, ApiError> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => ok_json(&serde_json::json!({ "ok": true })),

        (&Method::GET, "/indexes") => ok_json(&*domain::INDEXES),

        (&Method::GET, "/selftest") => {
            SELFTEST_RUNS.inc();
            let report = domain::run_self_tests();
            if !report.ok {
                SELFTEST_FAILURES.inc();
                warn!(results = ?report.results, "self-test battery failed");
            }
            ok_json(&report)
        }

        (&Method::POST, "/calc") => {
            let body = read_body(req.into_body(), ctx.limits.max_body_bytes).await?;
            let mut inputs: HedgeInputs =
                serde_json::from_slice(&body).map_err(|e| ApiError::BadJson(e.to_string()))?;
            forms::apply_presets(&mut inputs, &ctx.args);
            ok_json(&serve_calc(ctx, &inputs)?)
        }

        (&Method::POST, "/calc/form") => {
            let body = read_body(req.into_body(), ctx.limits.max_body_bytes).await?;
            let inputs = forms::parse_hedge_form(&body, &ctx.args);
            ok_json(&serve_calc(ctx, &inputs)?)
        }

        (&Method::POST, "/export") => {
            let body = read_body(req.into_body(), ctx.limits.max_body_bytes).await?;
            let mut req: ExportRequest =
                serde_json::from_slice(&body).map_err(|e| ApiError::BadJson(e.to_string()))?;
            forms::apply_presets(&mut req.inputs, &ctx.args);
            if req.inputs.options.len() > ctx.limits.max_rows {
                return Err(ApiError::TooManyRows(ctx.limits.max_rows));
            }
            let payload = domain::build_export_payload(&req.inputs, &req.notes);
            EXPORTS.inc();

            let req_id = next_req_id();
            info!(%req_id, index = %payload.index, contracts = payload.summary.contracts, "export served");
            record(
                ctx,
                Event::Export(CalcEvent {
                    req_id,
                    ts_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128,
                    index: payload.index.clone(),
                    contracts: payload.summary.contracts,
                    rows: payload.rows.len(),
                }),
            );
            ok_json(&payload)
        }

        (method, path) => Err(ApiError::NotFound(method.clone(), path.to_string())),
    }
}

async fn handle(req: Request<Body>, ctx: Arc<Ctx>) -> Result<Response<Body>, Infallible> {
    let endpoint = endpoint_label(req.uri().path());
    let resp = match route(req, &ctx).await {
        Ok(r) => r,
        Err(e) => {
            warn!(%endpoint, error = %e, "request rejected");
            json_response(e.status(), &serde_json::json!({ "error": e.to_string() }))
        }
    };
    HTTP_REQUESTS
        .with_label_values(&[endpoint, resp.status().as_str()])
        .inc();
    Ok(resp)
}

pub async fn serve_api(args: Args, limits: Limits, rec_tx: Option<mpsc::Sender<Event>>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], args.api_port));
    let ctx = Arc::new(Ctx { args, limits, rec_tx });

    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, ctx.clone()))) }
    });

    info!(%addr, "api listening");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(?e, "api server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Rounding;

    fn test_ctx() -> Arc<Ctx> {
        Arc::new(Ctx {
            args: Args {
                api_port: 0,
                metrics_port: 0,
                record_file: None,
                default_index: "FTSE100".to_string(),
                default_rounding: Rounding::Round,
            },
            limits: Limits { max_rows: 10, max_body_bytes: 4096 },
            rec_tx: None,
        })
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_ok() {
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = handle(req, test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["ok"], true);
    }

    #[tokio::test]
    async fn calc_golden_scenario_over_http() {
        let req = post(
            "/calc",
            r#"{"index":"FTSE100","notional":2000000,"marketPrice":9400,"strike":9000,
                "multiplier":10,"feePerContract":10,"rounding":"round",
                "options":[{"expiry":"2025-12","offerPts":163.5}],"currency":"£"}"#,
        );
        let resp = handle(req, test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["summary"]["contracts"], 21);
        assert_eq!(v["rows"][0]["totalCost"], 34545.0);
        assert_eq!(v["rows"][0]["breakevenPrice"], 8826.5);
    }

    #[tokio::test]
    async fn calc_form_variant() {
        let req = post(
            "/calc/form",
            "index=Custom&notional=1500000&marketPrice=500&strike=480&multiplier=25\
             &feePerContract=5&rounding=ceil&expiry%5B%5D=2026-03&offerPts%5B%5D=12.5",
        );
        let resp = handle(req, test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["summary"]["contracts"], 120);
    }

    #[tokio::test]
    async fn export_echoes_notes() {
        let req = post(
            "/export",
            r#"{"inputs":{"index":"ES","notional":100,"marketPrice":50,"strike":48,
                "multiplier":50,"feePerContract":1,"rounding":"floor","options":[],
                "currency":"$"},"notes":"desk memo"}"#,
        );
        let resp = handle(req, test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["notes"], "desk memo");
        assert_eq!(v["indexName"], "S&P 500 E-mini (CME)");
        assert_eq!(v["inputs"]["notional"], 100.0);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let resp = handle(post("/calc", "{not json"), test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        // well past the 4096-byte test cap
        let big = format!(r#"{{"index":"{}"}}"#, "x".repeat(8192));
        let resp = handle(post("/calc", &big), test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn row_cap_is_enforced() {
        let rows: Vec<String> = (0..11)
            .map(|i| format!(r#"{{"expiry":"2026-{i:02}","offerPts":1}}"#))
            .collect();
        let body = format!(
            r#"{{"index":"SPX","notional":1,"marketPrice":1,"strike":1,"multiplier":1,
                "feePerContract":0,"rounding":"round","options":[{}],"currency":"$"}}"#,
            rows.join(",")
        );
        let resp = handle(post("/calc", &body), test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = handle(req, test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn selftest_reports_ok() {
        let req = Request::builder().uri("/selftest").body(Body::empty()).unwrap();
        let resp = handle(req, test_ctx()).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["ok"], true);
        assert_eq!(v["results"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn indexes_table_served() {
        let req = Request::builder().uri("/indexes").body(Body::empty()).unwrap();
        let resp = handle(req, test_ctx()).await.unwrap();
        let v = body_json(resp).await;
        assert_eq!(v["FTSE100"]["multiplier"], 10.0);
        assert_eq!(v["SPX"]["name"], "S&P 500 (SPX options)");
    }
}
