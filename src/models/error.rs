use std::error::Error as StdError;
use thiserror::Error;

/// Boxed cause carried by [`ArchiverError::Failed`]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used by every archiver operation
pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Errors raised by archiver batch operations
///
/// `Canceled` is kept apart from every other failure so callers can tell
/// "stopped on request" from "failed". It is never wrapped.
#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("Operation canceled")]
    Canceled,

    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ArchiverError {
    /// Build a failure without an underlying cause
    pub fn new(message: impl Into<String>) -> Self {
        ArchiverError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap `cause` with a descriptive message.
    ///
    /// A cancellation passes through untouched.
    pub fn wrap<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        let cause: BoxError = cause.into();
        match cause.downcast::<ArchiverError>() {
            Ok(inner) if inner.is_canceled() => ArchiverError::Canceled,
            Ok(inner) => ArchiverError::Failed {
                message: message.into(),
                source: Some(inner as BoxError),
            },
            Err(other) => ArchiverError::Failed {
                message: message.into(),
                source: Some(other),
            },
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ArchiverError::Canceled)
    }
}

/// Quote a path or name for error messages
pub(crate) fn quote(value: impl AsRef<str>) -> String {
    format!("\"{}\"", value.as_ref())
}
