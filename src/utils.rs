/// Canonical form of a VIN for comparison and cache keys: trimmed, upper-cased.
pub fn normalize_vin(vin: &str) -> String {
    vin.trim().to_uppercase()
}

/// Find the largest char boundary in `s` that is <= `max_bytes`.
/// Safe for slicing: `&s[..find_char_boundary(s, max_bytes)]` never panics.
pub fn find_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// Shorten an upstream body for inclusion in an error message.
pub fn truncate_body(body: &str, max_bytes: usize) -> String {
    let end = find_char_boundary(body, max_bytes);
    if end < body.len() {
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
