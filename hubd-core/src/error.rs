use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error taxonomy shared by every hubd component.
///
/// Each variant carries a message; `Driver` keeps its transport cause and
/// `Internal` an opaque trace id that is logged but never expanded to
/// clients. Management surfaces render errors through the uniform envelope
/// (HTTP 200 + business code); the proxy, SSE and webhook paths use
/// [`HubError::http_status`] for raw status codes instead.
pub enum HubError {
    /// Validation failure, message names the offending field path.
    InvalidInput(String),
    NotFound(String),
    Unauthorized(String),
    /// State-machine violation (e.g. pausing a draft task).
    Conflict(String),
    /// Admission refused, queue full.
    Busy(String),
    /// A where clause or DDL statement was rejected.
    UnsafeQuery(String),
    /// Underlying driver failure with transport context, post-retry.
    Driver {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// Downstream store failure in the proxy path; carries its status code.
    Upstream { status: u16, message: String },
    /// Cooperative cancellation honored.
    Cancelled,
    Internal { message: String, trace_id: String },
}

impl HubError {
    pub fn invalid_input(field: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        HubError::InvalidInput(format!("{}: {detail}", field.into()))
    }

    pub fn driver(message: impl Into<String>) -> Self {
        HubError::Driver {
            message: message.into(),
            source: None,
        }
    }

    pub fn driver_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        HubError::Driver {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an `Internal` error with a fresh trace id. The full message is
    /// logged here; callers surface only the trace id.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(trace_id = %trace_id, error = %message, "internal error");
        HubError::Internal { message, trace_id }
    }

    /// Business status code for the management envelope.
    pub fn business_status(&self) -> u16 {
        match self {
            HubError::InvalidInput(_) | HubError::UnsafeQuery(_) => 400,
            HubError::Unauthorized(_) => 401,
            HubError::NotFound(_) => 404,
            HubError::Conflict(_) => 409,
            HubError::Busy(_) => 503,
            HubError::Upstream { status, .. } => *status,
            HubError::Driver { .. } | HubError::Cancelled | HubError::Internal { .. } => 500,
        }
    }

    /// Raw HTTP status for the proxy / SSE / webhook paths, which do not
    /// wrap responses in the envelope.
    pub fn http_status(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::from_u16(self.business_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Message rendered to clients. `Internal` collapses to the trace id.
    pub fn public_message(&self) -> String {
        match self {
            HubError::Internal { trace_id, .. } => {
                format!("internal error (trace {trace_id})")
            }
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            HubError::NotFound(msg) => write!(f, "not found: {msg}"),
            HubError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            HubError::Conflict(msg) => write!(f, "conflict: {msg}"),
            HubError::Busy(msg) => write!(f, "busy: {msg}"),
            HubError::UnsafeQuery(msg) => write!(f, "unsafe query: {msg}"),
            HubError::Driver { message, .. } => write!(f, "driver error: {message}"),
            HubError::Upstream { status, message } => {
                write!(f, "upstream error ({status}): {message}")
            }
            HubError::Cancelled => write!(f, "cancelled"),
            HubError::Internal { message, trace_id } => {
                write!(f, "internal error [{trace_id}]: {message}")
            }
        }
    }
}

impl std::fmt::Debug for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::Driver {
                source: Some(cause),
                ..
            } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => HubError::NotFound("row not found".into()),
            other => HubError::internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16()).unwrap_or(500);
        HubError::Upstream {
            status,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::InvalidInput(err.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": self.business_status(),
            "msg": self.public_message(),
            "data": serde_json::Value::Null,
        });
        (axum::http::StatusCode::OK, Json(body)).into_response()
    }
}

/// Result alias used across hubd crates.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn business_status_mapping() {
        assert_eq!(HubError::InvalidInput("x".into()).business_status(), 400);
        assert_eq!(HubError::UnsafeQuery("x".into()).business_status(), 400);
        assert_eq!(HubError::Unauthorized("x".into()).business_status(), 401);
        assert_eq!(HubError::NotFound("x".into()).business_status(), 404);
        assert_eq!(HubError::Conflict("x".into()).business_status(), 409);
        assert_eq!(HubError::Busy("x".into()).business_status(), 503);
        assert_eq!(HubError::driver("x").business_status(), 500);
        assert_eq!(
            HubError::Upstream {
                status: 404,
                message: "missing".into()
            }
            .business_status(),
            404
        );
    }

    #[test]
    fn internal_message_is_opaque() {
        let err = HubError::internal("password was hunter2");
        let public = err.public_message();
        assert!(!public.contains("hunter2"), "leaked: {public}");
        assert!(public.contains("trace"));
    }

    #[test]
    fn invalid_input_carries_field_path() {
        let err = HubError::invalid_input("connection_config.host", "missing");
        assert!(err.to_string().contains("connection_config.host"));
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: HubError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.business_status(), 404);
    }

    #[tokio::test]
    async fn envelope_response_is_http_200() {
        let resp = HubError::NotFound("task 42".into()).into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 404);
        assert!(json["msg"].as_str().unwrap().contains("task 42"));
    }
}
