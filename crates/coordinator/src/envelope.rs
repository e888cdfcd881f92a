//! Canonical result envelope.
//!
//! Gated on `COORDINATOR_RESULT_ENVELOPE=1`. The envelope is a thin
//! router-level wrapper; handlers never see it.

use coord_core::{CoordError, ErrorCode};
use serde_json::json;

pub const ENVELOPE_ENV: &str = "COORDINATOR_RESULT_ENVELOPE";

pub fn envelope_enabled() -> bool {
    std::env::var(ENVELOPE_ENV).is_ok_and(|v| v == "1")
}

pub struct CallMeta {
    pub tool: String,
    pub duration_ms: u64,
    pub request_id: String,
    pub warnings: Vec<String>,
}

pub fn success(text: &str, meta: &CallMeta) -> String {
    json!({
        "ok": true,
        "data": { "text": text },
        "error": null,
        "meta": {
            "tool": meta.tool,
            "durationMs": meta.duration_ms,
            "requestId": meta.request_id,
            "warnings": meta.warnings,
        },
    })
    .to_string()
}

pub fn failure(code: ErrorCode, message: &str, meta: &CallMeta) -> String {
    json!({
        "ok": false,
        "data": null,
        "error": { "code": code.as_str(), "message": message },
        "meta": {
            "tool": meta.tool,
            "durationMs": meta.duration_ms,
            "requestId": meta.request_id,
            "warnings": meta.warnings,
        },
    })
    .to_string()
}

/// Plain-text rendering used when the envelope is off.
pub fn plain_error(err: &CoordError) -> String {
    format!("{}: {err}", err.code())
}
