//! Wire protocol types for valheim-monitor.
//!
//! Shared by the daemon and its clients so the request schema cannot drift.
//! Framing is one JSON object per line: the client writes a `Request`
//! terminated by `\n`, the daemon answers with a single `Response` line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_RAW_LINES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    GetRawLines,
    ResetState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(id.into()),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parameters for `get_raw_lines`. A missing limit means "the daemon's
/// configured default".
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLinesParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn parse_raw_lines_params(params: Option<Value>) -> Result<RawLinesParams, ErrorInfo> {
    let Some(params) = params else {
        return Ok(RawLinesParams::default());
    };
    if params.is_null() {
        return Ok(RawLinesParams::default());
    }
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }

    let parsed: RawLinesParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("raw lines params are invalid: {}", err),
        )
    })?;

    match parsed.limit {
        Some(0) => Err(ErrorInfo::new(
            "invalid_limit",
            "limit must be greater than zero",
        )),
        Some(limit) if limit > MAX_RAW_LINES => Err(ErrorInfo::new(
            "invalid_limit",
            format!("limit must be {} or fewer", MAX_RAW_LINES),
        )),
        _ => Ok(parsed),
    }
}
