use thiserror::Error;

/// Errors returned by a [`SelfService`](super::SelfService) call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No credentials supplied. Set an access token, a refresh token, or email and password.")]
    MissingCredentials,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API returned error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response carried no location reference")]
    MissingLocation,
}

impl ApiError {
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        ApiError::Http {
            status,
            body: body.into(),
        }
    }

    /// HTTP status if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for the validation-failure class (422 Unprocessable Entity).
    pub fn is_validation_failure(&self) -> bool {
        self.status() == Some(422)
    }

    /// Render the error for humans.
    ///
    /// HTTP errors become `HTTP Response Code: <status>\nMessage:\n<body>`,
    /// with JSON bodies pretty-printed.
    pub fn format(&self) -> String {
        match self {
            ApiError::Http { status, body } => {
                let message = serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| serde_json::to_string_pretty(&v).ok())
                    .unwrap_or_else(|| body.clone());
                format!("HTTP Response Code: {}\nMessage:\n{}", status, message)
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pretty_prints_json() {
        let err = ApiError::http(500, r#"{"foo":"barbaz"}"#);
        let text = err.format();
        assert!(text.starts_with("HTTP Response Code: 500\nMessage:\n"));
        assert!(text.contains("\"foo\": \"barbaz\""));
    }

    #[test]
    fn test_format_plain_body() {
        let err = ApiError::http(422, "syntax error on line 3");
        assert_eq!(
            err.format(),
            "HTTP Response Code: 422\nMessage:\nsyntax error on line 3"
        );
        assert!(err.is_validation_failure());
    }

    #[test]
    fn test_format_non_http() {
        let err = ApiError::Network("connection refused".to_string());
        assert_eq!(err.format(), "Network error: connection refused");
        assert_eq!(err.status(), None);
    }
}
