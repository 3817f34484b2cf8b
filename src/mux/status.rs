//! Backend status codes and their HTTP mapping.

use std::fmt;

use axum::http::StatusCode;
use thiserror::Error;

use crate::error::BoxError;

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Numeric code to [`Code`]; unknown values map to `Unknown`.
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Wire value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// HTTP status a failed call with this code is rendered with.
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            // Client Closed Request, nginx's non-standard code.
            Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                StatusCode::BAD_REQUEST
            }
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A failed backend call: code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rpc error: code = {code} desc = {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Status with `code` and a human-readable message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Recover the status carried by `err`, or wrap it as `Unknown`.
    pub fn from_error(err: BoxError) -> Status {
        match err.downcast::<Status>() {
            Ok(status) => *status,
            Err(other) => Status::new(Code::Unknown, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_i32() {
        assert_eq!(Code::from_i32(Code::NotFound.as_i32()), Code::NotFound);
        assert_eq!(Code::from_i32(99), Code::Unknown);
        assert_eq!(Code::from_i32(2), Code::Unknown);
    }

    #[test]
    fn http_mapping() {
        assert_eq!(Code::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(Code::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Code::Unavailable.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Code::Cancelled.http_status().as_u16(), 499);
        assert_eq!(Code::FailedPrecondition.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_survives_boxing() {
        let err: BoxError = Box::new(Status::not_found("no such user"));
        let status = Status::from_error(err);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such user");
    }

    #[test]
    fn foreign_error_becomes_unknown() {
        let err: BoxError = Box::new(std::io::Error::other("socket closed"));
        let status = Status::from_error(err);
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "socket closed");
    }
}
