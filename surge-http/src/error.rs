use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse transport-failure classification as it appears in run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    ConnectionRefused,
    DnsFailure,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Timeout(_) => TransportErrorKind::Timeout,
            Self::Request(err) => classify_transport(err),
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::RequestBuild(_)
            | Self::HeaderName(_)
            | Self::HeaderValue(_)
            | Self::BodyRead(_) => TransportErrorKind::Other,
        }
    }

    /// True for failures where no HTTP response was received and another
    /// attempt can meaningfully succeed. Request-construction errors are
    /// terminal: retrying the same malformed input cannot help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Request(_) | Self::BodyRead(_)
        )
    }
}

fn classify_transport(err: &hyper_util::client::legacy::Error) -> TransportErrorKind {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(err) = cause {
        // hyper-util surfaces resolver failures as a plain "dns error" in the
        // cause chain rather than a typed error.
        let msg = err.to_string();
        if msg.contains("dns error") {
            return TransportErrorKind::DnsFailure;
        }

        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return TransportErrorKind::ConnectionRefused;
            }
            if io.to_string().contains("lookup address") {
                return TransportErrorKind::DnsFailure;
            }
            return TransportErrorKind::Other;
        }

        cause = std::error::Error::source(err);
    }
    TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::str::FromStr;

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(TransportErrorKind::ConnectionRefused.to_string(), "connection_refused");
        assert_eq!(TransportErrorKind::DnsFailure.to_string(), "dns_failure");
        assert_eq!(
            TransportErrorKind::from_str("timeout").unwrap(),
            TransportErrorKind::Timeout
        );
    }

    #[test]
    fn construction_errors_are_not_retryable() {
        let err = Error::InvalidUrl("not a url".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), TransportErrorKind::Other);
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = Error::Timeout(Duration::from_secs(1));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), TransportErrorKind::Timeout);
    }
}
