/// Strips the weak-validator prefix and surrounding quotes from a raw
/// `ETag` or `X-Linked-Etag` header value. The result is the key a blob is
/// stored under.
pub fn normalize_etag(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    trimmed.trim_matches('"').to_string()
}
