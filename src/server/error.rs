use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::Error;

/// API错误类型
pub struct AppError {
    error: anyhow::Error,
    status: Option<StatusCode>,
}

impl AppError {
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    fn status(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        match self.error.downcast_ref::<Error>() {
            Some(Error::InvalidImage(_) | Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, format!("Something went wrong: {}", self.error)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self { error: err.into(), status: None }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
