use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::error::{ErrorReply, RouterError};

/// Error type for the admin HTTP surface: one enum, one `to_status_code`
/// match, implementing `IntoResponse` directly.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("dispatch failed: {0}")]
    Dispatch(RouterError),
    #[error("failed to encode metrics: {0}")]
    Metrics(String),
}

impl AdminError {
    const fn to_status_code(&self) -> StatusCode {
        match self {
            Self::Dispatch(RouterError::ChainNotSupported { .. })
            | Self::Dispatch(RouterError::ProviderNotConfigured { .. }) => StatusCode::NOT_FOUND,
            Self::Dispatch(_) => StatusCode::BAD_GATEWAY,
            Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.to_status_code();
        let body = match &self {
            Self::Dispatch(err) => Json(ErrorReply::from(err)),
            Self::Metrics(message) => Json(ErrorReply {
                kind: "MetricsEncodeError".to_string(),
                message: message.clone(),
                context: Default::default(),
            }),
        };
        (status, body).into_response()
    }
}
