// ===============================
// src/forms.rs
// ===============================
//
// Form adapter: decodes application/x-www-form-urlencoded bodies with
// parallel option arrays (expiry[], offerPts[]) into HedgeInputs.
// The legacy form UIs post parallel arrays zipped by position, so the
// row count is the longest array; gaps become zero-valued placeholders.
//
// Coercion rules (adapter responsibility, never a core fault):
// - missing or non-numeric scalar fields coerce to 0.0
// - rows with an empty expiry are dropped before reaching the core
// - a blank index falls back to the configured default
// - blank multiplier/currency default from the preset table when the
//   index is a known preset

use ahash::AHashMap as HashMap;
use url::form_urlencoded;

use crate::config::Args;
use crate::domain::{HedgeInputs, OptionRow, Rounding, INDEXES};

/// Lenient float parse; empty or junk input coerces to the default.
fn to_float(s: Option<&str>, default: f64) -> f64 {
    match s {
        Some(raw) => {
            let t = raw.trim();
            if t.is_empty() {
                default
            } else {
                t.parse().unwrap_or(default)
            }
        }
        None => default,
    }
}

/// Decoded form fields: last-wins scalars plus ordered `name[]` arrays.
struct FormFields {
    scalars: HashMap<String, String>,
    arrays: HashMap<String, Vec<String>>,
}

impl FormFields {
    fn decode(body: &[u8]) -> Self {
        let mut scalars: HashMap<String, String> = HashMap::new();
        let mut arrays: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in form_urlencoded::parse(body) {
            if let Some(name) = k.strip_suffix("[]") {
                arrays.entry(name.to_string()).or_default().push(v.into_owned());
            } else {
                scalars.insert(k.into_owned(), v.into_owned());
            }
        }
        Self { scalars, arrays }
    }

    fn scalar(&self, key: &str) -> Option<&str> {
        self.scalars.get(key).map(String::as_str)
    }

    fn array(&self, key: &str) -> &[String] {
        self.arrays.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Zip expiry[]/offerPts[] by position. `ask[]` is accepted as a legacy
/// alias for offerPts[]. Rows with an empty expiry are dropped.
fn parse_options(fields: &FormFields) -> Vec<OptionRow> {
    let expiries = fields.array("expiry");
    let offers = if fields.arrays.contains_key("offerPts") {
        fields.array("offerPts")
    } else {
        fields.array("ask")
    };

    let n = expiries.len().max(offers.len());
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let expiry = expiries.get(i).map(|s| s.trim()).unwrap_or("");
        if expiry.is_empty() {
            continue;
        }
        let offer_pts = to_float(offers.get(i).map(String::as_str), 0.0);
        rows.push(OptionRow { expiry: expiry.to_string(), offer_pts });
    }
    rows
}

/// Fill blanks from config and the preset table: a blank index takes the
/// configured default; a known preset supplies multiplier/currency when
/// the request leaves them unset.
pub fn apply_presets(inputs: &mut HedgeInputs, args: &Args) {
    if inputs.index.trim().is_empty() {
        inputs.index = args.default_index.clone();
    }
    if let Some(preset) = INDEXES.get(inputs.index.as_str()) {
        if inputs.multiplier == 0.0 {
            inputs.multiplier = preset.multiplier;
        }
        if inputs.currency.is_empty() {
            inputs.currency = preset.currency.to_string();
        }
    }
}

/// Decode a urlencoded form body into HedgeInputs. Total: any byte soup
/// yields usable inputs, worst case all zeros and no rows.
pub fn parse_hedge_form(body: &[u8], args: &Args) -> HedgeInputs {
    let fields = FormFields::decode(body);

    let mut inputs = HedgeInputs {
        index: fields.scalar("index").unwrap_or("").trim().to_string(),
        notional: to_float(fields.scalar("notional"), 0.0),
        // legacy form UIs call the market price "spot"
        market_price: to_float(fields.scalar("marketPrice").or_else(|| fields.scalar("spot")), 0.0),
        strike: to_float(fields.scalar("strike"), 0.0),
        multiplier: to_float(fields.scalar("multiplier"), 0.0),
        fee_per_contract: to_float(fields.scalar("feePerContract"), 0.0),
        rounding: fields
            .scalar("rounding")
            .and_then(Rounding::parse_one)
            .unwrap_or(args.default_rounding),
        options: parse_options(&fields),
        currency: fields.scalar("currency").unwrap_or("").to_string(),
    };
    apply_presets(&mut inputs, args);
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_args() -> Args {
        Args {
            api_port: 8080,
            metrics_port: 9898,
            record_file: None,
            default_index: "FTSE100".to_string(),
            default_rounding: Rounding::Round,
        }
    }

    #[test]
    fn parses_parallel_arrays_in_order() {
        let body = b"index=FTSE100&notional=2000000&marketPrice=9400&strike=9000&multiplier=10\
            &feePerContract=10&rounding=round\
            &expiry%5B%5D=2025-12&offerPts%5B%5D=163.5\
            &expiry%5B%5D=2026-03&offerPts%5B%5D=180";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.options.len(), 2);
        assert_eq!(inputs.options[0].expiry, "2025-12");
        assert_eq!(inputs.options[0].offer_pts, 163.5);
        assert_eq!(inputs.options[1].expiry, "2026-03");
        assert_eq!(inputs.notional, 2_000_000.0);
        assert_eq!(inputs.rounding, Rounding::Round);
    }

    #[test]
    fn drops_rows_with_empty_expiry() {
        let body = b"index=ES&expiry%5B%5D=&offerPts%5B%5D=99&expiry%5B%5D=2026-06&offerPts%5B%5D=12";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.options.len(), 1);
        assert_eq!(inputs.options[0].expiry, "2026-06");
        assert_eq!(inputs.options[0].offer_pts, 12.0);
    }

    #[test]
    fn junk_numerics_coerce_to_zero() {
        let body = b"index=SPX&notional=lots&marketPrice=&strike=abc&expiry%5B%5D=2026-01&offerPts%5B%5D=oops";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.notional, 0.0);
        assert_eq!(inputs.market_price, 0.0);
        assert_eq!(inputs.strike, 0.0);
        assert_eq!(inputs.options[0].offer_pts, 0.0);
    }

    #[test]
    fn missing_offer_array_pads_rows() {
        let body = b"index=Custom&multiplier=2&expiry%5B%5D=2026-01&expiry%5B%5D=2026-02&offerPts%5B%5D=5";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.options.len(), 2);
        assert_eq!(inputs.options[0].offer_pts, 5.0);
        assert_eq!(inputs.options[1].offer_pts, 0.0);
    }

    #[test]
    fn accepts_legacy_spot_and_ask_names() {
        let body = b"index=ES&spot=500&expiry%5B%5D=2026-03&ask%5B%5D=12.5";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.market_price, 500.0);
        assert_eq!(inputs.options[0].offer_pts, 12.5);
    }

    #[test]
    fn blank_index_takes_configured_default() {
        let inputs = parse_hedge_form(b"notional=100", &test_args());
        assert_eq!(inputs.index, "FTSE100");
        // preset fills multiplier and currency too
        assert_eq!(inputs.multiplier, 10.0);
        assert_eq!(inputs.currency, "\u{a3}");
    }

    #[test]
    fn preset_defaults_do_not_override_explicit_values() {
        let body = b"index=ES&multiplier=5&currency=%C2%A3";
        let inputs = parse_hedge_form(body, &test_args());
        assert_eq!(inputs.multiplier, 5.0);
        assert_eq!(inputs.currency, "\u{a3}");
    }

    #[test]
    fn unknown_index_left_untouched() {
        let inputs = parse_hedge_form(b"index=DAX&multiplier=", &test_args());
        assert_eq!(inputs.index, "DAX");
        assert_eq!(inputs.multiplier, 0.0);
        assert_eq!(inputs.currency, "");
    }

    #[test]
    fn empty_body_is_total() {
        let inputs = parse_hedge_form(b"", &test_args());
        assert!(inputs.options.is_empty());
        assert_eq!(inputs.index, "FTSE100");
    }
}
