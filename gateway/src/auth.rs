//! Gate for the mutating endpoints.
//!
//! Submitting and cancelling proof jobs are guarded by one shared key when
//! `GATEWAY_API_KEY` is set; read-only endpoints stay open. The key is
//! accepted either as an `x-api-key` header or as a bearer token so both
//! service callers and browser clients can present it.

use actix_web::http::header::{HeaderMap, AUTHORIZATION};

const API_KEY_HEADER: &str = "x-api-key";

/// True when the request may mutate job state. No configured key means the
/// gateway runs open, for local development.
pub(crate) fn caller_may_mutate(headers: &HeaderMap, required_key: Option<&str>) -> bool {
    let Some(required_key) = required_key else {
        return true;
    };

    header_key(headers) == Some(required_key)
        || bearer_key(headers).is_some_and(|key| key == required_key)
}

fn header_key(headers: &HeaderMap) -> Option<&str> {
    let key = headers.get(API_KEY_HEADER)?.to_str().ok()?.trim();
    if key.is_empty() {
        return None;
    }
    Some(key)
}

fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = authorization.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let key = rest.trim();
    if key.is_empty() {
        return None;
    }
    Some(key)
}
