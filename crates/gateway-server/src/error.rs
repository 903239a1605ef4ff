//! Maps [`GatewayError`] onto HTTP per §7: only `BlockingInput`/
//! `BlockingOutput` ever carry guardrail `details`; everything else is a
//! bare message. `ExplorerPush` and `MalformedFrame` never reach here —
//! they're logged and swallowed at the point they occur, not surfaced to
//! the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::error::GatewayError;
use serde_json::json;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            GatewayError::ClientAuth(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            GatewayError::PolicyParse(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            GatewayError::BlockingInput { details } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "[Invariant] The request did not pass the guardrails", "details": details }),
            ),
            GatewayError::BlockingOutput { details } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "[Invariant] The response did not pass the guardrails", "details": details }),
            ),
            GatewayError::UpstreamTransport(msg) => {
                tracing::error!(error = %msg, "upstream transport error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Request error" }))
            }
            GatewayError::MalformedFrame(msg) => {
                tracing::warn!(error = %msg, "malformed frame");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Unexpected error" }))
            }
            GatewayError::InvalidPushHeader(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("invalid Invariant-Push header value: {msg}") }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_input_keeps_its_details_payload() {
        let err = ApiError(GatewayError::BlockingInput { details: json!({"errors": ["x"]}) });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
