pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure reported by the backend (auth, tables, transport) ends up as
/// one of these variants. The message is meant for logs; API responses never
/// echo it back to the client.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("auth provider error: {message}")]
    AuthProvider {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("not found: {message}")]
    NotFound {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BackendErrorKind {
    Network,
    AuthProvider,
    Validation,
    NotFound,
}

impl BackendError {
    pub fn network(message: impl Into<String>) -> Self {
        BackendError::Network {
            message: message.into(),
            cause: None,
        }
    }

    pub fn auth_provider(message: impl Into<String>) -> Self {
        BackendError::AuthProvider {
            message: message.into(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BackendError::Validation {
            message: message.into(),
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        BackendError::NotFound {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause<E>(mut self, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let slot = match &mut self {
            BackendError::Network { cause, .. }
            | BackendError::AuthProvider { cause, .. }
            | BackendError::Validation { cause, .. }
            | BackendError::NotFound { cause, .. } => cause,
        };
        *slot = Some(error.into());
        self
    }

    /// Picks the variant for an HTTP status returned by the backend.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => BackendError::auth_provider(message),
            404 => BackendError::not_found(message),
            400 | 409 | 422 => BackendError::validation(message),
            _ => BackendError::network(message),
        }
    }

    pub fn kind(&self) -> BackendErrorKind {
        match self {
            BackendError::Network { .. } => BackendErrorKind::Network,
            BackendError::AuthProvider { .. } => BackendErrorKind::AuthProvider,
            BackendError::Validation { .. } => BackendErrorKind::Validation,
            BackendError::NotFound { .. } => BackendErrorKind::NotFound,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BackendError::Network { message, .. }
            | BackendError::AuthProvider { message, .. }
            | BackendError::Validation { message, .. }
            | BackendError::NotFound { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn status_mapping() {
        assert_eq!(BackendError::from_status(401, "x").kind(), BackendErrorKind::AuthProvider);
        assert_eq!(BackendError::from_status(404, "x").kind(), BackendErrorKind::NotFound);
        assert_eq!(BackendError::from_status(409, "x").kind(), BackendErrorKind::Validation);
        assert_eq!(BackendError::from_status(503, "x").kind(), BackendErrorKind::Network);
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = BackendError::network("request failed").with_cause(io);
        assert_eq!(err.message(), "request failed");
        assert_eq!(err.source().unwrap().to_string(), "timed out");
    }
}
