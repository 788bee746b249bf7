//! Bridge error types.
//!
//! Request-scoped errors map to bare HTTP status codes via the
//! `IntoResponse` impl; the control plane inspects status codes only, so
//! responses carry no body. Actual failure causes are logged server-side
//! where they occur.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Non-standard "Client Closed Request" status, reported when the client
/// cancels a proxied request mid-flight. The connection is already gone,
/// so the code is informational for logs.
pub const HTTP_STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Request-scoped bridge error.
///
/// Maps to HTTP status codes:
/// - `BadRequest`: 400 (missing/bad bearer header, bad tunnel request)
/// - `Unauthorized`: 401 (token or tenant rejected)
/// - `ClientClosedRequest`: 499 (client cancelled during forward)
/// - `Internal`: 500 (token accepted but user claim missing or malformed)
/// - `BadGateway`: 502 (bad target URL, upstream transport failure)
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bad request")]
    BadRequest,

    #[error("unauthorized")]
    Unauthorized,

    #[error("client closed request")]
    ClientClosedRequest,

    #[error("internal server error")]
    Internal,

    #[error("bad gateway")]
    BadGateway,
}

impl BridgeError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::BadRequest => StatusCode::BAD_REQUEST,
            BridgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeError::ClientClosedRequest => {
                StatusCode::from_u16(HTTP_STATUS_CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::BAD_GATEWAY)
            }
            BridgeError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(BridgeError::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            BridgeError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(BridgeError::ClientClosedRequest.status_code().as_u16(), 499);
        assert_eq!(
            BridgeError::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(BridgeError::BadGateway.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_responses_have_no_body_content_type() {
        let response = BridgeError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
