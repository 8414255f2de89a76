//! HTTP error mapping for the topology API.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use concord_core::ErrorKind;
use concord_topology::TopologyError;
use serde::Serialize;
use thiserror::Error;

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced over HTTP.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Error from the topology service
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Malformed request parameters
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Topology(err) => match err.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Configuration => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Rejected => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Transport => StatusCode::BAD_GATEWAY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status())
            .json(ErrorBody { success: false, message: self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::Topology(TopologyError::ShardNotFound("s1".into()));
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let rejected = ApiError::Topology(TopologyError::SubscriberLimit(100));
        assert_eq!(rejected.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let bad = ApiError::BadRequest("limit out of range".into());
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    }
}
