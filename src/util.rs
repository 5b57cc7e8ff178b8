//! Shared utility functions for the Crosscheck application.

use axum::http::HeaderMap;

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for the timeline journal.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Request context folded into timeline entry meta for operator-initiated
/// transitions, so the journal records where an action came from.
pub fn request_meta(headers: &HeaderMap) -> Option<serde_json::Value> {
    let (ip, user_agent) = extract_request_info(headers);
    if ip.is_none() && user_agent.is_none() {
        return None;
    }
    Some(serde_json::json!({ "ip": ip, "user_agent": user_agent }))
}
