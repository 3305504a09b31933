//! services/api/src/web/auth.rs
//!
//! Request identity helpers: the bearer credential and the `deep_client`
//! cookie that keys a browser's pending production slot.

use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

pub const CLIENT_COOKIE: &str = "deep_client";

/// One year; the slot itself expires much sooner.
const CLIENT_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 365;

/// The raw token of an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| c.trim().strip_prefix(prefix.as_str()).map(str::to_string))
        .filter(|v| !v.is_empty())
}

/// The client key from the cookie, if the browser already has one.
pub fn client_key(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, CLIENT_COOKIE)
}

/// The existing client key, or a fresh one plus the `Set-Cookie` to issue it.
pub fn client_key_or_issue(headers: &HeaderMap) -> (String, Option<HeaderValue>) {
    if let Some(key) = client_key(headers) {
        return (key, None);
    }
    let key = Uuid::new_v4().simple().to_string();
    let cookie = format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        CLIENT_COOKIE, key, CLIENT_COOKIE_MAX_AGE
    );
    // A hex uuid is always a valid header value.
    let value = HeaderValue::from_str(&cookie).ok();
    (key, value)
}
