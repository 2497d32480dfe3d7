// ===============================
// src/config.rs
// ===============================
//
// Env-driven configuration (a .env file is honored if present).
//
//   API_PORT=8080          JSON API listen port
//   METRICS_PORT=9898      Prometheus text endpoint port
//   RECORD_FILE=...        optional JSONL audit log path
//   DEFAULT_INDEX=FTSE100  preset used when a request leaves index blank
//   DEFAULT_ROUNDING=round fallback rounding mode for form requests
//   MAX_ROWS=200           adapter-level cap on option rows per request
//   MAX_BODY_BYTES=65536   request body size cap
//
// Invalid or missing values fall back to the defaults above.

use std::env;

use dotenvy::dotenv;

use crate::domain::Rounding;

impl Rounding {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" | "nearest" => Some(Rounding::Round),
            "ceil" | "ceiling" | "up" => Some(Rounding::Ceil),
            "floor" | "down" => Some(Rounding::Floor),
            _ => None,
        }
    }

    pub fn from_env(key: &str, default_mode: Rounding) -> Rounding {
        env::var(key)
            .ok()
            .and_then(|s| Self::parse_one(&s))
            .unwrap_or(default_mode)
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub api_port: u16,
    pub metrics_port: u16,
    pub record_file: Option<String>,
    pub default_index: String,
    pub default_rounding: Rounding,
}

/// Adapter-level request guards. The calc core itself accepts anything;
/// these caps only bound what a single HTTP request may carry.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_rows: usize,
    pub max_body_bytes: usize,
}

pub fn load() -> (Args, Limits) {
    let _ = dotenv();

    let api_port = env::var("API_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    let record_file = env::var("RECORD_FILE").ok();

    let default_index = env::var("DEFAULT_INDEX").unwrap_or_else(|_| "FTSE100".to_string());
    let default_rounding = Rounding::from_env("DEFAULT_ROUNDING", Rounding::Round);

    let args = Args {
        api_port,
        metrics_port,
        record_file,
        default_index,
        default_rounding,
    };

    let max_rows = env::var("MAX_ROWS").ok().and_then(|x| x.parse().ok()).unwrap_or(200);
    let max_body_bytes = env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|x| x.parse().ok())
        .unwrap_or(65_536);

    let limits = Limits { max_rows, max_body_bytes };
    (args, limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_parse_one_accepts_aliases() {
        assert_eq!(Rounding::parse_one("round"), Some(Rounding::Round));
        assert_eq!(Rounding::parse_one(" CEIL "), Some(Rounding::Ceil));
        assert_eq!(Rounding::parse_one("down"), Some(Rounding::Floor));
        assert_eq!(Rounding::parse_one("banker"), None);
    }
}
