//! Unified error handling for the API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use hearth_devices::{DeviceError, MpdError};

/// API error response with an HTTP status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Bad request (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message, StatusCode::BAD_REQUEST)
    }

    /// Not found (404).
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            "NOT_FOUND",
            format!("{} not found", resource.into()),
            StatusCode::NOT_FOUND,
        )
    }

    /// Validation error (422).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            "VALIDATION_ERROR",
            message,
            StatusCode::UNPROCESSABLE_ENTITY,
        )
    }

    /// Internal server error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Service unavailable (503).
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            "SERVICE_UNAVAILABLE",
            message,
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

impl From<DeviceError> for ErrorResponse {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::DeviceNotFound(name) => Self::not_found(format!("Device '{}'", name)),
            DeviceError::CapabilityNotFound { device, capability } => {
                Self::not_found(format!("Capability '{}' on '{}'", capability, device))
            }
            DeviceError::NotARelay(_) | DeviceError::UnsupportedCapability { .. } => {
                Self::validation(e.to_string())
            }
            DeviceError::RelayNetwork { .. }
            | DeviceError::BusNotPowered { .. }
            | DeviceError::BusPower(_)
            | DeviceError::DriverTimeout { .. }
            | DeviceError::PinUnavailable { .. }
            | DeviceError::Chip { .. } => Self::service_unavailable(e.to_string()),
            DeviceError::Mpd(e) => e.into(),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<MpdError> for ErrorResponse {
    fn from(e: MpdError) -> Self {
        match e {
            MpdError::UnknownCommand(_) | MpdError::Ack { .. } => {
                Self::validation(format!("MPD: {}", e))
            }
            MpdError::InvalidArgument(_) => Self::bad_request(format!("MPD: {}", e)),
            MpdError::Connect { .. } | MpdError::Timeout(_) | MpdError::Io(_) => {
                Self::service_unavailable(format!("MPD: {}", e))
            }
            _ => Self::internal(format!("MPD: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_device_error_status_mapping() {
        let status = |e: DeviceError| ErrorResponse::from(e).status;

        assert_eq!(
            status(DeviceError::DeviceNotFound("attic".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(DeviceError::NotARelay("in".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(DeviceError::RelayNetwork {
                relay: "heater".into(),
                message: "timed out".into(),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(DeviceError::DriverTimeout {
                device: "in".into(),
                timeout: Duration::from_secs(2),
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(DeviceError::DuplicateDevice("in".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_mpd_error_status_mapping() {
        let err: ErrorResponse = MpdError::UnknownCommand("update".into()).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let err: ErrorResponse = MpdError::Timeout(Duration::from_secs(3)).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err: ErrorResponse = DeviceError::Mpd(MpdError::InvalidArgument("x".into())).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_message() {
        let err = ErrorResponse::not_found("Device 'attic'");
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Device 'attic' not found");
    }
}
