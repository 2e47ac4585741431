//! Client helper for querying the valheim-monitor daemon over TCP.

use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use valheim_monitor_protocol::{Method, Request, Response};

pub const ADDR_ENV: &str = "VALHEIM_MONITOR_ADDR";
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 2000;
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// `--addr` wins, then `VALHEIM_MONITOR_ADDR`, then the default.
pub fn resolve_addr<F>(flag: Option<String>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    flag.or_else(|| lookup(ADDR_ENV))
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

/// Sends one request and returns the response payload, turning daemon-side
/// errors into `Err`.
pub fn call(addr: &str, method: Method, params: Option<Value>) -> Result<Value, String> {
    let mut request = Request::new(method, format!("valheim-status-{}", std::process::id()));
    request.params = params;

    let response = send_request(addr, &request)?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string()))
    }
}

fn send_request(addr: &str, request: &Request) -> Result<Response, String> {
    let mut stream = TcpStream::connect(addr)
        .map_err(|err| format!("Failed to connect to monitor at {}: {}", addr, err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response<R: Read>(stream: &mut R) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_RESPONSE_BYTES {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for monitor response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Monitor response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
