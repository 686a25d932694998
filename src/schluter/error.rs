use reqwest::StatusCode;

/// Failures surfaced by [`super::SchluterClient`].
///
/// The three variants line up with what the user can do about them:
/// re-enter credentials, wait for the service to come back, or report a bug.
#[derive(Debug, thiserror::Error)]
pub enum SchluterError {
    /// Credentials or refresh token rejected, or no session established.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network failure or timeout talking to the vendor cloud.
    #[error("cannot connect to Schluter API: {0}")]
    Connection(String),

    /// The API answered, but not with something usable.
    #[error("Schluter API error: {0}")]
    Api(String),
}

pub type SchluterResult<T> = Result<T, SchluterError>;

impl SchluterError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Classify a `reqwest` failure for the request described by `what`.
    pub(crate) fn from_reqwest(what: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(what, status);
        }
        if err.is_decode() {
            Self::Api(format!("{what}: invalid response body: {err}"))
        } else {
            Self::Connection(format!("{what}: {err}"))
        }
    }

    pub(crate) fn from_status(what: &str, status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Self::Authentication(format!("{what} rejected with HTTP {status}"))
            }
            _ => Self::Api(format!("{what} returned HTTP {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_and_forbidden_are_auth_errors() {
        assert!(SchluterError::from_status("login", StatusCode::UNAUTHORIZED).is_auth());
        assert!(SchluterError::from_status("login", StatusCode::FORBIDDEN).is_auth());
    }

    #[test]
    fn server_error_is_api_error() {
        let err = SchluterError::from_status("get devices", StatusCode::BAD_GATEWAY);
        assert!(matches!(err, SchluterError::Api(_)));
        assert!(err.to_string().contains("get devices returned HTTP 502"));
    }
}
