//! Uniform management response envelope.
//!
//! Every management endpoint replies `{ "status": int, "msg": string,
//! "data": any }` with HTTP 200; `status = 0` means success. The proxy,
//! SSE and webhook paths bypass the envelope entirely.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub msg: String,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 0,
            msg: "ok".into(),
            data: Some(data),
        }
    }

    pub fn err(status: u16, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
            data: None,
        }
    }
}

impl Envelope<()> {
    /// Success reply with no payload.
    pub fn ok_empty() -> Self {
        Self {
            status: 0,
            msg: "ok".into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (axum::http::StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_shape() {
        let env = Envelope::ok(vec![1, 2, 3]);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["msg"], "ok");
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn err_envelope_has_no_data() {
        let env: Envelope<()> = Envelope::err(409, "already active");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], 409);
        assert_eq!(json["data"], serde_json::Value::Null);
    }
}
