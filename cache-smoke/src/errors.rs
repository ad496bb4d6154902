use std::fmt;

use thiserror::Error;

use crate::client::Backend;

/// Library-wide result type.
pub type SmokeResult<T> = Result<T, SmokeError>;

/// Coarse classification of a [`SmokeError`], used to pick the process exit code.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A flag, environment variable or URL could not be understood.
    Config,
    /// The server could not be reached at all.
    Connect,
    /// The client library reported a failure while talking to the server.
    Backend,
    /// The server answered, but with something other than what was written.
    Assertion,
}

/// The error type for everything in this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SmokeError {
    /// Bad configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Opening a connection failed.
    #[error("could not connect to {backend} at {target}: {source}")]
    Connect {
        backend: Backend,
        target: String,
        #[source]
        source: BackendError,
    },

    /// A command failed on an open connection.
    #[error("{backend} command failed: {source}")]
    Backend {
        backend: Backend,
        #[source]
        source: BackendError,
    },

    /// A read returned a value different from the one written.
    #[error("value mismatch for {key:?}: expected {expected:?}, got {}", Nil(.actual))]
    Mismatch {
        key: String,
        expected: String,
        actual: Option<String>,
    },

    /// A key expected to be absent was present.
    #[error("expected {key:?} to be absent, got {actual:?}")]
    UnexpectedValue { key: String, actual: String },
}

/// Errors coming out of the underlying client libraries.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Memcache(#[from] memcache::MemcacheError),
}

impl SmokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SmokeError::Config(_) => ErrorKind::Config,
            SmokeError::Connect { .. } => ErrorKind::Connect,
            SmokeError::Backend { .. } => ErrorKind::Backend,
            SmokeError::Mismatch { .. } | SmokeError::UnexpectedValue { .. } => {
                ErrorKind::Assertion
            }
        }
    }

    /// Returns true if the server returned data that contradicts what was written,
    /// as opposed to a transport or configuration problem.
    pub fn is_assertion(&self) -> bool {
        self.kind() == ErrorKind::Assertion
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SmokeError::Config(msg.into())
    }

    pub(crate) fn connect(
        backend: Backend,
        target: impl Into<String>,
        source: impl Into<BackendError>,
    ) -> Self {
        SmokeError::Connect {
            backend,
            target: target.into(),
            source: source.into(),
        }
    }

    pub(crate) fn backend(backend: Backend, source: impl Into<BackendError>) -> Self {
        SmokeError::Backend {
            backend,
            source: source.into(),
        }
    }
}

// Renders an optional read the way `redis-cli` shows a nil reply.
struct Nil<'a>(&'a Option<String>);

impl fmt::Display for Nil<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value:?}"),
            None => f.write_str("(nil)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_renders_nil_for_missing_reads() {
        let err = SmokeError::Mismatch {
            key: "foo".into(),
            expected: "bar".into(),
            actual: None,
        };
        assert_eq!(
            err.to_string(),
            r#"value mismatch for "foo": expected "bar", got (nil)"#
        );
        assert!(err.is_assertion());
    }

    #[test]
    fn mismatch_quotes_present_reads() {
        let err = SmokeError::Mismatch {
            key: "foo".into(),
            expected: "bar".into(),
            actual: Some("baz".into()),
        };
        assert_eq!(
            err.to_string(),
            r#"value mismatch for "foo": expected "bar", got "baz""#
        );
    }

    #[test]
    fn redis_failures_are_backend_errors() {
        let err = SmokeError::backend(
            Backend::Redis,
            redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe")),
        );
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(!err.is_assertion());
        assert!(err.to_string().starts_with("redis command failed"));
    }

    #[test]
    fn config_errors_keep_their_message() {
        let err = SmokeError::config("unknown protocol \"resp4\"");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(
            err.to_string(),
            "invalid configuration: unknown protocol \"resp4\""
        );
    }
}
