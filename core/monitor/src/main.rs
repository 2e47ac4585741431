//! Valheim monitor daemon entrypoint.
//!
//! Follows the server container's log, keeps the session tracker current and
//! answers status queries over a TCP socket. One JSON request per connection,
//! one JSON response back.

use std::env;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::{json, Value};
use valheim_core::{load_config, MonitorConfig, MonitorContext};
use valheim_monitor_protocol::{
    parse_raw_lines_params, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

const READ_TIMEOUT_SECS: u64 = 2;
const WRITE_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load monitor config; using defaults");
            MonitorConfig::default()
        }
    };

    let listen_addr = config.listen_addr();
    let listener = match TcpListener::bind(&listen_addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %listen_addr, "Failed to bind monitor socket");
            std::process::exit(1);
        }
    };

    info!(
        addr = %listen_addr,
        container = %config.container,
        tail_lines = config.tail_lines,
        stale_log_seconds = config.stale_log_seconds,
        "Valheim monitor started"
    );

    let context = Arc::new(MonitorContext::new(config));
    context.start();

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(move || handle_connection(stream, context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept monitor connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("VALHEIM_MONITOR_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn handle_connection(mut stream: TcpStream, context: Arc<MonitorContext>) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Monitor request received");
    let response = handle_request(request, &context);
    if let Err(err) = write_response(&mut stream, response) {
        tracing::debug!(error = %err, "Failed to write response");
    }
}

fn read_request<R: Read + SetReadTimeout>(stream: &mut R) -> Result<Request, ErrorInfo> {
    stream.apply_read_timeout(Duration::from_secs(READ_TIMEOUT_SECS));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    parse_request_bytes(&buffer)
}

/// Lets `read_request` run against in-memory readers in tests.
trait SetReadTimeout {
    fn apply_read_timeout(&mut self, timeout: Duration);
}

impl SetReadTimeout for TcpStream {
    fn apply_read_timeout(&mut self, timeout: Duration) {
        let _ = self.set_read_timeout(Some(timeout));
    }
}

fn parse_request_bytes(buffer: &[u8]) -> Result<Request, ErrorInfo> {
    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            let trailing = &buffer[index + 1..];
            if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer,
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, context: &MonitorContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = to_value_or_null(context.health());
            data["protocol_version"] = json!(PROTOCOL_VERSION);
            Response::ok(request.id, data)
        }
        Method::GetStatus => {
            let report = context.status();
            tracing::debug!(
                server_ready = report.server_ready,
                players_online = report.snapshot.players_online,
                "Status report built"
            );
            match serde_json::to_value(report) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("failed to serialize status: {}", err),
                ),
            }
        }
        Method::GetRawLines => {
            let params = match parse_raw_lines_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let lines = context.raw_lines(params.limit);
            let text = lines.join("\n");
            Response::ok(
                request.id,
                json!({
                    "count": lines.len(),
                    "lines": lines,
                    "text": text,
                }),
            )
        }
        Method::ResetState => {
            context.reset();
            Response::ok(request.id, json!({ "reset": true }))
        }
    }
}

fn to_value_or_null<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn write_response(stream: &mut TcpStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
