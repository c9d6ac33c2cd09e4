use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use crate::{
    channel::ChannelError, jobs::JobQueueError, models::AppointmentId, phone::PhoneError,
    store::StoreError,
};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<JobQueueError> for AppError {
    fn from(value: JobQueueError) -> Self {
        AppError::internal(value)
    }
}

/// Failure classes of the notification pipeline. The class decides whether a
/// queued job is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("delivery failed: {0}")]
    RecoverableDelivery(String),
    #[error("unknown tenant {0}")]
    UnknownTenant(String),
    #[error("unknown appointment {0}")]
    UnknownAppointment(AppointmentId),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] JobQueueError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RecoverableDelivery(_) | Self::Store(_) | Self::Queue(_)
        )
    }
}

impl From<PhoneError> for PipelineError {
    fn from(value: PhoneError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<ChannelError> for PipelineError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::Configuration(message) => Self::Configuration(message),
        }
    }
}
