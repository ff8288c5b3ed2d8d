//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves a single static body. A `Range: bytes=<start>-` request gets a 206
//! with Content-Range, or 416 when the start is past the end. Every Range
//! header received is recorded.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, 206 responses carry no Content-Range header.
    pub send_content_range: bool,
    /// If true, 206 responses always claim to start at byte 0.
    pub restart_at_zero: bool,
    /// If true, requests for any path but `/file` get a 301 to `/file`.
    pub redirect: bool,
    /// If true, every request gets a 302 without a Location header.
    pub dangling_redirect: bool,
    /// Write the body in chunks of this size with `chunk_delay` between them.
    pub chunk_size: usize,
    pub chunk_delay: Option<Duration>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            send_content_range: true,
            restart_at_zero: false,
            redirect: false,
            dangling_redirect: false,
            chunk_size: 16 * 1024,
            chunk_delay: None,
        }
    }
}

pub struct RangeServer {
    pub url: String,
    ranges: Arc<Mutex<Vec<String>>>,
}

impl RangeServer {
    /// Range header values received so far, in arrival order.
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }
}

/// Starts a server in a background thread serving `body`. The server runs
/// until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ranges);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &body, opts, &seen));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/data.bin", port),
        ranges,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    seen: &Mutex<Vec<String>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, path, range) = parse_request(request);
    if let Some(raw) = range.as_ref().map(|(raw, _)| raw.clone()) {
        seen.lock().unwrap().push(raw);
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }
    if opts.dangling_redirect {
        let _ = stream.write_all(b"HTTP/1.1 302 Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }
    if opts.redirect && path != "/file" {
        let _ = stream.write_all(
            b"HTTP/1.1 301 Moved Permanently\r\nLocation: /file\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let total = body.len() as u64;
    let start = range.map(|(_, start)| start).filter(|_| opts.support_ranges);
    let (status, content_range, slice) = match start {
        Some(start) if start >= total => (
            "416 Range Not Satisfiable",
            Some(format!("bytes */{}", total)),
            &body[0..0],
        ),
        Some(start) => {
            let start = if opts.restart_at_zero { 0 } else { start as usize };
            let slice = &body[start..];
            (
                "206 Partial Content",
                opts.send_content_range
                    .then(|| format!("bytes {}-{}/{}", start, total - 1, total)),
                slice,
            )
        }
        None => ("200 OK", None, body),
    };
    let content_range = content_range
        .map(|v| format!("Content-Range: {}\r\n", v))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n",
        status,
        slice.len(),
        content_range
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    for chunk in slice.chunks(opts.chunk_size.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        let _ = stream.flush();
        if let Some(delay) = opts.chunk_delay {
            thread::sleep(delay);
        }
    }
}

/// Returns (method, path, optional (raw Range value, start)) for `Range: bytes=X-`.
fn parse_request(request: &str) -> (&str, &str, Option<(String, u64)>) {
    let mut method = "";
    let mut path = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            let mut parts = line.split_whitespace();
            method = parts.next().unwrap_or("");
            path = parts.next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(part) = value.strip_prefix("bytes=") {
                    if let Some((a, _)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        range = Some((value.to_string(), start));
                    }
                }
            }
        }
    }
    (method, path, range)
}
