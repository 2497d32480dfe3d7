// ===============================
// src/domain.rs
// ===============================
//
// Hedge-sizing arithmetic core:
// - Rounding policy (round/ceil/floor) for fractional contract counts.
// - Contract count derivation: notional / (price * multiplier).
// - Per-row cost/breakeven derivation for each option expiry.
// - Aggregate summary + export payload assembly.
// - Runtime self-test battery (golden values), exposed via GET /selftest.
//
// "No defined value" is modeled as Option<f64>, never as a NaN sentinel:
// every step that can produce an undefined number branches explicitly, so
// a non-finite value cannot leak into a rounded integer field.
//
// Every function here is total: any input produces a value, never an error.

use ahash::AHashMap as HashMap;
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Policy for turning a fractional contract count into a whole number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Nearest integer, halves away from zero (f64::round semantics).
    #[default]
    Round,
    Ceil,
    Floor,
}

/// Apply a rounding mode. None or a non-finite value rounds to 0.
pub fn apply_rounding(v: Option<f64>, mode: Rounding) -> i64 {
    let v = match v {
        Some(x) if x.is_finite() => x,
        _ => return 0,
    };
    let r = match mode {
        Rounding::Ceil => v.ceil(),
        Rounding::Floor => v.floor(),
        Rounding::Round => v.round(),
    };
    r as i64
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRow {
    pub expiry: String,
    #[serde(default)]
    pub offer_pts: f64,
}

/// One calculation request. Missing JSON fields fall back to zero-valued
/// defaults rather than rejecting the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HedgeInputs {
    pub index: String, // "FTSE100" | "ES" | "SPX" | "Custom" | freeform
    pub notional: f64,
    pub market_price: f64,
    pub strike: f64,
    pub multiplier: f64,
    pub fee_per_contract: f64,
    pub rounding: Rounding,
    pub options: Vec<OptionRow>,
    pub currency: String, // display only, no computational effect
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContractCount {
    /// Unrounded division result; 0.0 when the base is undefined.
    pub raw: f64,
    /// Always a finite integer, 0 when the base is undefined.
    pub rounded: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub expiry: String,
    pub offer_pts: f64,
    pub premium_per_contract: f64,
    pub total_cost: f64,
    pub breakeven_price: f64,
    /// None when marketPrice is zero; serialized as JSON null.
    pub pct_move: Option<f64>,
    /// None when notional is zero; serialized as JSON null.
    pub cost_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub contracts: i64,
    pub notional_covered: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationResult {
    pub summary: Summary,
    pub rows: Vec<RowResult>,
}

/// Inputs echoed back in an export, minus the option rows (those appear
/// fully derived under `rows`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoedInputs {
    pub notional: f64,
    pub market_price: f64,
    pub strike: f64,
    pub multiplier: f64,
    pub fee_per_contract: f64,
    pub rounding: Rounding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub generated_at: String,
    pub index: String,
    pub index_name: String,
    pub currency: String,
    pub inputs: EchoedInputs,
    pub summary: Summary,
    pub rows: Vec<RowResult>,
    pub notes: String,
}

// ===== Preset index table =====

#[derive(Debug, Clone, Serialize)]
pub struct IndexPreset {
    pub name: &'static str,
    pub multiplier: f64,
    pub currency: &'static str,
}

pub static INDEXES: Lazy<HashMap<&'static str, IndexPreset>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("FTSE100", IndexPreset { name: "FTSE 100 (ICE)", multiplier: 10.0, currency: "\u{a3}" });
    m.insert("ES", IndexPreset { name: "S&P 500 E-mini (CME)", multiplier: 50.0, currency: "$" });
    m.insert("SPX", IndexPreset { name: "S&P 500 (SPX options)", multiplier: 100.0, currency: "$" });
    m.insert("Custom", IndexPreset { name: "Custom Index", multiplier: 1.0, currency: "\u{a3}" });
    m
});

/// Display name for an index code; unknown codes echo the code itself.
pub fn index_display_name(code: &str) -> String {
    INDEXES
        .get(code)
        .map(|p| p.name.to_string())
        .unwrap_or_else(|| code.to_string())
}

// ===== Contract sizing =====

/// A divisor factor is usable only when finite and strictly positive.
fn positive_factor(x: f64) -> Option<f64> {
    (x.is_finite() && x > 0.0).then_some(x)
}

/// num / den, None when den is zero or the quotient is non-finite.
fn ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 {
        return None;
    }
    let r = num / den;
    r.is_finite().then_some(r)
}

/// Raw and rounded number of contracts for `notional / (price * multiplier)`.
pub fn compute_contracts(notional: f64, price: f64, multiplier: f64, rounding: Rounding) -> ContractCount {
    let base = match (positive_factor(price), positive_factor(multiplier)) {
        (Some(p), Some(m)) => {
            let b = notional / (p * m);
            b.is_finite().then_some(b)
        }
        _ => None,
    };
    ContractCount {
        raw: base.unwrap_or(0.0),
        rounded: apply_rounding(base, rounding),
    }
}

// ===== Per-row derivation =====

/// Cost and breakeven metrics for one option row. All rows of a request
/// share the one rounded contract count computed from the parent inputs.
pub fn compute_row(row: &OptionRow, inputs: &HedgeInputs, rounded_contracts: i64) -> RowResult {
    let premium_per_contract = row.offer_pts * inputs.multiplier;
    let total_cost = (premium_per_contract + inputs.fee_per_contract) * rounded_contracts as f64;
    let breakeven_price = (inputs.strike - inputs.fee_per_contract) - row.offer_pts;
    RowResult {
        expiry: row.expiry.clone(),
        offer_pts: row.offer_pts,
        premium_per_contract,
        total_cost,
        breakeven_price,
        pct_move: ratio(breakeven_price - inputs.market_price, inputs.market_price),
        cost_pct: ratio(total_cost, inputs.notional),
    }
}

// ===== Aggregation / export =====

/// Full calculation: one contract sizing pass, then one row derivation per
/// option. Output row order matches input row order.
pub fn compute_result(inputs: &HedgeInputs) -> CalculationResult {
    let ctr = compute_contracts(inputs.notional, inputs.market_price, inputs.multiplier, inputs.rounding);
    let rows = inputs
        .options
        .iter()
        .map(|r| compute_row(r, inputs, ctr.rounded))
        .collect();
    CalculationResult {
        summary: Summary {
            contracts: ctr.rounded,
            notional_covered: ctr.rounded as f64 * inputs.market_price * inputs.multiplier,
        },
        rows,
    }
}

/// Wrap a calculation with echoed inputs, a whole-second UTC timestamp and
/// the resolved index display name. The only non-pure step in this module.
pub fn build_export_payload(inputs: &HedgeInputs, notes: &str) -> ExportPayload {
    let calc = compute_result(inputs);
    ExportPayload {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        index: inputs.index.clone(),
        index_name: index_display_name(&inputs.index),
        currency: inputs.currency.clone(),
        inputs: EchoedInputs {
            notional: inputs.notional,
            market_price: inputs.market_price,
            strike: inputs.strike,
            multiplier: inputs.multiplier,
            fee_per_contract: inputs.fee_per_contract,
            rounding: inputs.rounding,
        },
        summary: calc.summary,
        rows: calc.rows,
        notes: notes.to_string(),
    }
}

// ===== Runtime self-test battery =====

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub ok: bool,
    pub results: Vec<String>,
}

const SELF_TEST_TOL: f64 = 1e-9;

/// Approximate float equality, relative + absolute tolerance.
fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= SELF_TEST_TOL.max(SELF_TEST_TOL * a.abs().max(b.abs()))
}

fn golden_inputs() -> HedgeInputs {
    HedgeInputs {
        index: "FTSE100".to_string(),
        notional: 2_000_000.0,
        market_price: 9400.0,
        strike: 9000.0,
        multiplier: 10.0,
        fee_per_contract: 10.0,
        rounding: Rounding::Round,
        options: vec![OptionRow { expiry: "2025-12".to_string(), offer_pts: 163.5 }],
        currency: "\u{a3}".to_string(),
    }
}

/// Golden-value checks pinning the numeric behavior of this module. These
/// literal values are the authoritative contract for the arithmetic.
pub fn run_self_tests() -> SelfTestReport {
    let mut results: Vec<String> = Vec::new();
    let mut ok = true;

    // Contract sizing: 2,000,000 / (9,400 * 10)
    let c = compute_contracts(2_000_000.0, 9400.0, 10.0, Rounding::Round);
    ok &= approx(c.raw, 2_000_000.0 / (9400.0 * 10.0));
    ok &= c.rounded == 21;
    results.push(format!("contracts raw={:.6} rounded={}", c.raw, c.rounded));

    // Row derivation parity with the sheet example
    let inputs = golden_inputs();
    let result = compute_result(&inputs);
    let row = &result.rows[0];
    ok &= approx(row.premium_per_contract, 163.5 * 10.0);
    ok &= approx(row.total_cost, (1635.0 + 10.0) * 21.0);
    ok &= approx(row.breakeven_price, (9000.0 - 10.0) - 163.5);
    ok &= row
        .pct_move
        .map_or(false, |p| approx(p, ((9000.0 - 10.0 - 163.5) - 9400.0) / 9400.0));
    ok &= row.cost_pct.map_or(false, |p| approx(p, 34545.0 / 2_000_000.0));
    results.push("row calc tests ok".to_string());

    // Rounding mode boundaries
    ok &= apply_rounding(Some(21.2), Rounding::Ceil) == 22;
    ok &= apply_rounding(Some(21.8), Rounding::Floor) == 21;
    results.push("rounding mode tests ok".to_string());

    // NaN/zero guards
    let c2 = compute_contracts(1_000_000.0, f64::NAN, 10.0, Rounding::Round);
    ok &= approx(c2.raw, 0.0) && c2.rounded == 0;
    results.push("nan price contracts ok".to_string());

    // Custom index + ceil rounding
    let custom_inputs = HedgeInputs {
        index: "Custom".to_string(),
        notional: 1_500_000.0,
        market_price: 500.0,
        strike: 480.0,
        multiplier: 25.0,
        fee_per_contract: 5.0,
        rounding: Rounding::Ceil,
        options: vec![OptionRow { expiry: "2026-03".to_string(), offer_pts: 12.5 }],
        currency: "\u{a3}".to_string(),
    };
    let r2 = compute_result(&custom_inputs);
    ok &= r2.summary.contracts == apply_rounding(Some(1_500_000.0 / (500.0 * 25.0)), Rounding::Ceil);
    results.push("custom index + ceil rounding ok".to_string());

    // Export invariants
    let payload = build_export_payload(&inputs, "note");
    ok &= payload.summary.contracts == 21;
    ok &= payload.rows.len() == 1;
    ok &= payload.inputs.notional == 2_000_000.0;
    ok &= payload.notes == "note";
    results.push("export payload tests ok".to_string());

    SelfTestReport { ok, results }
}
