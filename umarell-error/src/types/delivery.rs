use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Failures isolated during fan-out.
///
/// The broker never returns these from `publish`; it builds them to log the
/// failure and count it in its metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("subscriber {subscriber} failed while handling '{channel}': {reason}")]
    CallbackFailure {
        channel: String,
        subscriber: u64,
        reason: String,
    },
}

impl ErrorExt for DeliveryError {
    fn status_code(&self) -> StatusCode {
        StatusCode::CallbackFailed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::CallbackFailure { channel, .. } => vec![
                ("error_type", "delivery".to_string()),
                ("status_code", self.status_code().to_string()),
                ("channel", channel.clone()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_failure_display() {
        let err = DeliveryError::CallbackFailure {
            channel: "news".into(),
            subscriber: 7,
            reason: "index out of bounds".into(),
        };
        assert_eq!(
            err.to_string(),
            "subscriber 7 failed while handling 'news': index out of bounds"
        );
        assert_eq!(err.status_code(), StatusCode::CallbackFailed);
        assert!(err.metrics_tags().contains(&("channel", "news".to_string())));
    }
}
