//! The gateway's JSON error envelope.
//!
//! Every non-2xx body is `{ success: false, error, error_code? }`: clients
//! branch on the machine-readable code and surface the text to the player.

use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
    error_code: Option<&str>,
) -> HttpResponse {
    HttpResponse::build(status).json(ErrorEnvelope {
        success: false,
        error: message.into(),
        error_code: error_code.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[actix_web::test]
    async fn envelope_carries_code_only_when_present() {
        let resp = error_response(StatusCode::BAD_REQUEST, "bad tape", Some("invalid_tape"));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], Value::Bool(false));
        assert_eq!(value["error"], "bad tape");
        assert_eq!(value["error_code"], "invalid_tape");

        let resp = error_response(StatusCode::NOT_FOUND, "gone", None);
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value.get("error_code").is_none());
    }
}
