//! Status line and Content-Range parsing for collected response header lines.

use super::error::TransferError;

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

/// Status code of the last `HTTP/` line in `lines`.
pub fn parse_http_status(lines: &[String]) -> Option<u32> {
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("HTTP/"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
}

fn header_value<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Parse the Content-Range header. A missing header, an unknown total (`*`) or
/// an inconsistent range is reported as `MalformedContentRange`.
pub fn parse_content_range(lines: &[String]) -> Result<ContentRange, TransferError> {
    let Some(value) = header_value(lines, "content-range") else {
        return Err(TransferError::MalformedContentRange(None));
    };
    parse_value(value).ok_or_else(|| TransferError::MalformedContentRange(Some(value.to_string())))
}

fn parse_value(value: &str) -> Option<ContentRange> {
    let rest = value.strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;
    if start > end || end >= total {
        return None;
    }
    Some(ContentRange { start, end, total })
}
