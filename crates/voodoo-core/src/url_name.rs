//! Destination file names derived from a URL path.

use percent_encoding::percent_decode_str;

/// Linux NAME_MAX, in bytes.
const NAME_MAX: usize = 255;

/// Local file name for the resource at `url`: the last non-empty path segment,
/// percent-decoded and made safe to create in a single directory.
///
/// Returns `None` if the URL does not parse, has no path segment, or the
/// segment reduces to nothing usable (`.`, `..`, only dots or blanks).
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let name = sanitize(&decoded);
    (!name.is_empty()).then_some(name)
}

/// Separators, NUL and control characters become `_`; leading dots and
/// surrounding whitespace are dropped so the name can't escape the directory
/// or turn into a hidden file.
fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = mapped.trim().trim_start_matches('.').trim_start();
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].trim_end().to_string()
}
