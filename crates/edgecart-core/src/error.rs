use anyhow::Error as AnyError;
use serde_json::json;
use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::response::{IntoResponse, Json};

/// Error returned by handlers and host plumbing. Each variant maps onto one HTTP status.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("{message}")]
    BadRequest { message: String },
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("upstream error: {message}")]
    BadGateway { message: String },
    #[error("internal error: {source}")]
    Internal {
        #[from]
        source: AnyError,
    },
}

impl EdgeError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        EdgeError::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        EdgeError::NotFound {
            resource: resource.into(),
        }
    }

    /// The storefront or another upstream answered, but not usefully.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        EdgeError::BadGateway {
            message: message.into(),
        }
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<AnyError>,
    {
        EdgeError::Internal {
            source: error.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EdgeError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            EdgeError::NotFound { .. } => StatusCode::NOT_FOUND,
            EdgeError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            EdgeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.message(),
            }
        });
        (status, Json(payload)).into_response()
    }
}
