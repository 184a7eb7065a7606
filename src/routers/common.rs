/// Read a `Retry-After` delay hint in seconds; absent or unparseable
/// headers mean no hint.
pub(crate) fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
