//! Server Error Types
//!
//! Every [`ErrorKind`] maps to exactly one HTTP status. Handlers return
//! [`ApiError`], which wraps the full error tree so server-side failures can
//! be logged with their cause before the client only sees the status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use derive_more::{Display, Error};

/// A server error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A version query parameter is missing or not a non-negative integer.
    #[display("invalid version parameter `{_0}`")]
    InvalidVersion(#[error(not(source))] &'static str),
    #[display("password required")]
    MissingPassword,
    #[display("wrong password")]
    WrongPassword,
    #[display("unknown data type `{_0}`")]
    UnknownType(#[error(not(source))] String),
    /// There is no database folder to upload into.
    #[display("no database to upload into")]
    NoDatabase,
    /// The sequence of database folders for this year is used up, or the
    /// latest folder name cannot be continued.
    #[display("cannot create a database after `{_0}`")]
    VersionExhausted(#[error(not(source))] String),
    #[display("cache is not initialized yet")]
    NotInitialized,
    #[display("storage failure")]
    Storage,
    #[display("synchronization was triggered too recently")]
    CoolingDown,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidVersion(_) | Self::UnknownType(_) => StatusCode::BAD_REQUEST,
            Self::MissingPassword => StatusCode::UNAUTHORIZED,
            Self::WrongPassword => StatusCode::FORBIDDEN,
            Self::CoolingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoDatabase | Self::VersionExhausted(_) | Self::NotInitialized | Self::Storage => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::CoolingDown | Self::NotInitialized)
    }
}

/// Response-side wrapper around [`Error`].
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<ErrorKind> for ApiError {
    #[track_caller]
    fn from(kind: ErrorKind) -> Self {
        Self(Error::from(kind))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind: &ErrorKind = &self.0;
        let status = kind.status();
        match status.is_server_error() {
            true => tracing::error!(error = ?self.0, %status, "Request failed"),
            false => tracing::debug!(error = %kind, %status, "Request rejected"),
        }
        (status, kind.to_string()).into_response()
    }
}
