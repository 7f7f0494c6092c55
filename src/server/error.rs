use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::encoder::EncodeError;
use crate::error::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self { status, error: error.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, format!("Something went wrong: {}", self.error)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        // 查询本身有问题时返回 400，其余为 500
        let status = match error.downcast_ref::<Error>() {
            Some(Error::Encoder(EncodeError::Unsupported(_)) | Error::DimensionMismatch { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}
