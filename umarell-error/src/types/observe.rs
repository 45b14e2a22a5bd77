use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Errors raised while binding a subscriber to an object's property.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    #[error("property name must not be empty")]
    EmptyPropertyName,

    #[error("object has no observable property '{property}'")]
    UnknownProperty { property: String },

    #[error("object refused a listener on '{property}': {reason}")]
    ListenerRejected { property: String, reason: String },
}

impl ObserveError {
    pub fn unknown_property(property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            property: property.into(),
        }
    }
}

impl ErrorExt for ObserveError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyPropertyName => StatusCode::InvalidArgs,
            Self::UnknownProperty { .. } => StatusCode::UnknownProperty,
            Self::ListenerRejected { .. } => StatusCode::ListenerRejected,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
