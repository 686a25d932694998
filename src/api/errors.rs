use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use super::dto::ErrorBody;
use crate::{
    commands::CommandError,
    hub::HubError,
    schluter::SchluterError,
    setup::FlowError,
    store::StoreError,
};

/// JSON error response: `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, message = %self.message, "Request failed");
        }
        let body = Json(ErrorBody {
            error: self.code.to_owned(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<FlowError> for AppError {
    fn from(e: FlowError) -> Self {
        let status = match e {
            FlowError::InvalidAuth | FlowError::UnknownLocation(_) => StatusCode::BAD_REQUEST,
            FlowError::UnknownFlow(_) | FlowError::UnknownEntry(_) => StatusCode::NOT_FOUND,
            FlowError::AlreadyConfigured(_) => StatusCode::CONFLICT,
            FlowError::NoLocations | FlowError::NoDevices(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FlowError::CannotConnect(_) => StatusCode::BAD_GATEWAY,
            FlowError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<HubError> for AppError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "unknown_entry", e.to_string()),
            HubError::NotLoaded(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "not_loaded", e.to_string())
            }
            HubError::SetupFailed { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "setup_failed", e.to_string())
            }
            HubError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyConfigured(_) => {
                Self::new(StatusCode::CONFLICT, "already_configured", e.to_string())
            }
            StoreError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "unknown_entry", e.to_string()),
            StoreError::Io { .. } | StoreError::Corrupt { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "unknown", e.to_string())
            }
        }
    }
}

impl From<CommandError> for AppError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::UnknownDevice(_) => {
                Self::new(StatusCode::NOT_FOUND, "unknown_device", e.to_string())
            }
            CommandError::OutOfRange { .. } | CommandError::UnknownPreset(_) => {
                Self::new(StatusCode::BAD_REQUEST, "validation", e.to_string())
            }
            CommandError::Api(e) => e.into(),
        }
    }
}

impl From<SchluterError> for AppError {
    fn from(e: SchluterError) -> Self {
        let code = match e {
            SchluterError::Authentication(_) => "upstream_auth",
            SchluterError::Connection(_) => "cannot_connect",
            SchluterError::Api(_) => "upstream_api",
        };
        Self::new(StatusCode::BAD_GATEWAY, code, e.to_string())
    }
}
