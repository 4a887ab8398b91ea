//! Request authentication.
//!
//! Per-device endpoints accept a bearer token equal to the device's secret
//! key (the cooker reveals it over WiFi only, so holding it proves access to
//! the unit), or the admin's basic credentials. The admin device listing
//! additionally waives credentials for requests from the local network.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::{Json, RequestPartsExt};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::{Basic, Bearer};
use serde::Deserialize;
use tracing::{debug, error};

use super::AppState;
use super::models::ErrorResponse;
use crate::cooker::{self, Device};

pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    DeviceOffline,
    Device(cooker::Error),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }
}

impl From<cooker::Error> for ApiError {
    fn from(err: cooker::Error) -> Self {
        Self::Device(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            Self::DeviceOffline => (
                StatusCode::NOT_FOUND,
                "device is offline or not found".to_string(),
            ),
            Self::Device(err) => {
                let status = match &err {
                    cooker::Error::CommandNotSupported(_) => StatusCode::BAD_REQUEST,
                    cooker::Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    cooker::Error::ConnectionClosed => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            Self::Internal(err) => {
                error!(%err, "internal error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub fn is_local_request(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_loopback() || ip.is_private(),
        // Loopback or unique-local (fc00::/7).
        IpAddr::V6(ip) => ip.is_loopback() || (ip.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Explicit admin credentials. Never satisfied when none are configured.
pub fn admin_basic_authorized(
    state: &AppState,
    basic: Option<&Authorization<Basic>>,
) -> bool {
    let admin = &state.admin;
    if admin.username.is_empty() || admin.password.is_empty() {
        return false;
    }
    basic.is_some_and(|credentials| {
        credentials.username() == admin.username && credentials.password() == admin.password
    })
}

/// Admin credentials, or a request from the local network.
pub fn admin_authorized(
    state: &AppState,
    addr: &SocketAddr,
    basic: Option<&Authorization<Basic>>,
) -> bool {
    is_local_request(addr) || admin_basic_authorized(state, basic)
}

#[derive(Deserialize)]
struct DeviceSelector {
    device_id: String,
}

/// Resolves the `{device_id}` path segment to a live device after checking
/// that the caller may talk to it.
pub struct AuthenticatedDevice(pub Arc<Device>);

impl FromRequestParts<AppState> for AuthenticatedDevice {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(DeviceSelector { device_id }) = parts
            .extract::<Path<DeviceSelector>>()
            .await
            .map_err(|_| ApiError::BadRequest("invalid device id".to_string()))?;

        let device = state
            .manager
            .device(&device_id)
            .ok_or(ApiError::DeviceOffline)?;

        let bearer = parts
            .extract::<Option<TypedHeader<Authorization<Bearer>>>>()
            .await
            .ok()
            .flatten();
        if let Some(TypedHeader(bearer)) = &bearer {
            if !device.secret_key().is_empty() && bearer.token() == device.secret_key() {
                return Ok(Self(device));
            }
        }

        let basic = parts
            .extract::<Option<TypedHeader<Authorization<Basic>>>>()
            .await
            .ok()
            .flatten();
        if admin_basic_authorized(state, basic.as_ref().map(|TypedHeader(basic)| basic)) {
            return Ok(Self(device));
        }

        debug!(device = %device_id, "rejected request without valid credentials");
        Err(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_addresses_are_recognized() {
        let local: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let lan: SocketAddr = "192.168.1.7:80".parse().unwrap();
        let public: SocketAddr = "93.184.216.34:443".parse().unwrap();
        let v6_loopback: SocketAddr = "[::1]:80".parse().unwrap();
        let v6_public: SocketAddr = "[2001:db8::1]:80".parse().unwrap();

        assert!(is_local_request(&local));
        assert!(is_local_request(&lan));
        assert!(!is_local_request(&public));
        assert!(is_local_request(&v6_loopback));
        assert!(!is_local_request(&v6_public));
    }

    #[test]
    fn error_statuses_follow_the_failure_kind() {
        let cases = [
            (
                ApiError::Device(cooker::Error::Timeout),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ApiError::Device(cooker::Error::ConnectionClosed),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Device(cooker::Error::CommandNotSupported("GetDate")),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::DeviceOffline, StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
