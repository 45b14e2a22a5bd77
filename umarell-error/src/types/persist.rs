use std::{any::Any, io};

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

pub type PersistResult<T> = Result<T, PersistError>;

/// Errors of the persistence tiers.
///
/// None of these abort a publish: the broker logs them and delivers anyway.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The durable tier was asked to keep a value that has no serialized form.
    #[error("value of type {type_name} published on '{key}' is not serializable")]
    NotSerializable { key: String, type_name: String },

    #[error("failed to encode value for '{key}': {reason}")]
    Encode { key: String, reason: String },

    #[error("failed to decode value stored under '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("append-only log is corrupted: {reason}")]
    CorruptedLog { reason: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PersistError {
    pub fn not_serializable(
        key: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::NotSerializable {
            key: key.into(),
            type_name: type_name.into(),
        }
    }
}

impl ErrorExt for PersistError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotSerializable { .. } => StatusCode::NotSerializable,
            Self::Encode { .. } => StatusCode::SerializationFailed,
            Self::Decode { .. } => StatusCode::DeserializationFailed,
            Self::CorruptedLog { .. } => StatusCode::CorruptedData,
            Self::Io(err) => match err.kind() {
                io::ErrorKind::UnexpectedEof => StatusCode::UnexpectedEof,
                io::ErrorKind::StorageFull => StatusCode::DiskFull,
                _ => StatusCode::Io,
            },
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "persist".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::NotSerializable { type_name, .. } = self {
            tags.push(("value_type", type_name.clone()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_serializable_display_and_code() {
        let err = PersistError::not_serializable("prefs", "Opaque");
        assert_eq!(
            err.to_string(),
            "value of type Opaque published on 'prefs' is not serializable"
        );
        assert_eq!(err.status_code(), StatusCode::NotSerializable);
        assert!(err
            .metrics_tags()
            .contains(&("value_type", "Opaque".to_string())));
    }

    /// I/O errors map their kind onto storage status codes.
    #[test]
    fn test_io_kind_mapping() {
        let eof: PersistError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(eof.status_code(), StatusCode::UnexpectedEof);

        let other: PersistError = io::Error::other("boom").into();
        assert_eq!(other.status_code(), StatusCode::Io);
    }

    #[test]
    fn test_corrupted_log_is_critical() {
        let err = PersistError::CorruptedLog {
            reason: "bad magic".into(),
        };
        assert!(err.status_code().is_critical());
    }
}
