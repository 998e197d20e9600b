//! Bounded JSON field extraction for the enrollment response.
//!
//! The bridge's enroll response is a flat object with exactly two string
//! fields, so a general JSON parser is not needed here. This extractor
//! locates `"key":` and copies the following quoted string, unescaping
//! `\n` and `\\` only; PEM text carries no other escapes. Anything more
//! exotic in the value terminates the copy at the next quote.

/// Extract the string value of `key` from a flat JSON object.
///
/// Returns `None` if the key is absent or the value is not a quoted
/// string. Escaped newlines (`\n`) and backslashes (`\\`) in the value
/// are unescaped during extraction, so PEM blocks come back with real
/// line breaks.
pub fn extract_string_field(json: &str, key: &str) -> Option<String> {
    let anchor = format!("\"{}\":", key);
    let start = json.find(&anchor)? + anchor.len();
    let rest = json[start..].trim_start_matches(' ');
    let mut chars = rest.chars();
    if chars.next() != Some('"') {
        return None;
    }

    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                // Only \n and \\ are recognized; any other backslash
                // passes through verbatim.
                Some(other) => {
                    out.push('\\');
                    if other == '"' {
                        return Some(out);
                    }
                    out.push(other);
                }
                None => return None,
            },
            _ => out.push(c),
        }
    }

    // Unterminated string.
    None
}
