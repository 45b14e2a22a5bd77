use std::{any::Any, error::Error};

use crate::StatusCode;

/// Object-safe extension shared by every error of the bus.
///
/// Gives access to:
/// - the status code,
/// - a message safe to show to a caller,
/// - a detailed message for logs,
/// - tags for metrics backends.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Status of the error, [`StatusCode::Internal`] by default.
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Returns the error as [`Any`] so it can be downcast to its concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Message without internal details. Errors raised by the bus or its
    /// storage collapse to `"Internal error"`.
    fn client_message(&self) -> String {
        if self.status_code().is_server_error() {
            "Internal error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Detailed message, for logs only.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Key/value tags attached to error metrics.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Short type name of the error.
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

/// Owns any error implementing `ErrorExt`.
pub struct BoxedError {
    inner: Box<dyn ErrorExt>,
}

impl BoxedError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Box::new(err),
        }
    }

    pub fn into_inner(self) -> Box<dyn ErrorExt> {
        self.inner
    }
}

impl std::fmt::Debug for BoxedError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}

impl std::fmt::Display for BoxedError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for BoxedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl ErrorExt for BoxedError {
    fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }

    fn type_name(&self) -> String {
        self.inner.type_name()
    }
}
