use std::fmt;

use num_enum::TryFromPrimitive;

/// Status codes used to categorize errors.
///
/// # Ranges
/// - 0xxx: success
/// - 1xxx: general errors
/// - 2xxx: data errors
/// - 3xxx: delivery
/// - 4xxx: observation
/// - 5xxx: storage
/// - 6xxx: I/O
///
/// `num_enum::TryFromPrimitive` provides `TryFrom<u32>`, which is what log
/// pipelines use to map a numeric code back to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: success ===
    Success = 0,

    // === 1xxx: general ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: data ===
    NotFound = 2000,
    InvalidKey = 2001,
    InvalidValue = 2002,
    NotSerializable = 2003,

    // === 3xxx: delivery ===
    CallbackFailed = 3000,

    // === 4xxx: observation ===
    UnknownProperty = 4000,
    ListenerRejected = 4001,

    // === 5xxx: storage ===
    StorageUnavailable = 5000,
    DiskFull = 5001,
    CorruptedData = 5002,
    SerializationFailed = 5003,
    DeserializationFailed = 5004,

    // === 6xxx: I/O ===
    Io = 6000,
    UnexpectedEof = 6001,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl StatusCode {
    /// Numeric representation of the code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Looks up the variant for `v`, `None` when no variant matches.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Returns `true` if `code` denotes success.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Errors caused by the caller's input (2xxx and 4xxx, plus `InvalidArgs`).
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=2999).contains(&c) || (4000..=4999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Errors raised by the bus itself or its storage (1xxx, 3xxx, 5xxx, 6xxx).
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 3000..=3999 | 5000..=6999)
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable | Self::Io)
    }

    /// Whether the error should be reported as critical.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::CorruptedData | Self::DiskFull | Self::StorageUnavailable
        )
    }

    /// Recommended log level for this code.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound => LogLevel::Debug,
            Self::InvalidArgs | Self::InvalidKey | Self::InvalidValue | Self::UnknownProperty => {
                LogLevel::Info
            }
            Self::NotSerializable | Self::CallbackFailed | Self::ListenerRejected => LogLevel::Warn,
            Self::Internal | Self::CorruptedData | Self::DiskFull | Self::StorageUnavailable => {
                LogLevel::Error
            }
            _ => LogLevel::Warn,
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
