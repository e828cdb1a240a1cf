// Session error types and constants

use crate::error::{ConfigError, ErrorCode};
use crate::session::{DeviceMode, InputSource};
use log::error;
use std::fmt;

/// Session error code constants
///
/// These constants provide a single source of truth for the codes a
/// controller may see attached to rejected commands.
///
/// Error code range: 2001-2006
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// A non-Standby mode is active; stop it before starting another
    pub const MODE_ACTIVE: i32 = 2001;

    /// The stop target is not the active mode
    pub const NOT_ACTIVE: i32 = 2002;

    /// A storage operation failed while entering or leaving a mode
    pub const STORAGE_UNAVAILABLE: i32 = 2003;

    /// The selected audio input does not support the requested mode
    pub const WRONG_INPUT_SOURCE: i32 = 2004;

    /// The named stored sound does not exist
    pub const MISSING_FILE: i32 = 2005;

    /// A replacement configuration failed validation
    pub const INVALID_CONFIG: i32 = 2006;
}

/// Log a session error with structured context
///
/// Logged fields include the numeric error code and the component, so
/// serial captures can be correlated with host-side logs.
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=Session, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Session-related errors
///
/// These cover every precondition a Start/Stop operation checks. Each
/// maps to a NAK on the wire; device state is left unchanged.
///
/// Error code range: 2001-2006
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A non-Standby mode is active; stop it first
    ModeActive { current: DeviceMode },

    /// The stop target is not the active mode
    NotActive {
        requested: DeviceMode,
        current: DeviceMode,
    },

    /// A storage operation failed while entering or leaving a mode
    StorageUnavailable { name: String, reason: String },

    /// The selected audio input does not support the requested mode
    WrongInputSource { required: InputSource },

    /// The named stored sound does not exist
    MissingFile { name: String },

    /// A replacement configuration failed validation
    InvalidConfig(ConfigError),
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::ModeActive { .. } => SessionErrorCodes::MODE_ACTIVE,
            SessionError::NotActive { .. } => SessionErrorCodes::NOT_ACTIVE,
            SessionError::StorageUnavailable { .. } => SessionErrorCodes::STORAGE_UNAVAILABLE,
            SessionError::WrongInputSource { .. } => SessionErrorCodes::WRONG_INPUT_SOURCE,
            SessionError::MissingFile { .. } => SessionErrorCodes::MISSING_FILE,
            SessionError::InvalidConfig(_) => SessionErrorCodes::INVALID_CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::ModeActive { current } => {
                format!("{:?} is active. Stop it before starting another mode.", current)
            }
            SessionError::NotActive { requested, current } => {
                format!(
                    "Cannot stop {:?}: device is in {:?}.",
                    requested, current
                )
            }
            SessionError::StorageUnavailable { name, reason } => {
                format!("Storage failure on {}: {}", name, reason)
            }
            SessionError::WrongInputSource { required } => {
                format!("Requires the {:?} input to be selected.", required)
            }
            SessionError::MissingFile { name } => {
                format!("Stored sound {} does not exist.", name)
            }
            SessionError::InvalidConfig(err) => {
                format!("Configuration rejected: {}", err.message())
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::InvalidConfig(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_codes() {
        assert_eq!(
            SessionError::ModeActive {
                current: DeviceMode::Recording
            }
            .code(),
            SessionErrorCodes::MODE_ACTIVE
        );
        assert_eq!(
            SessionError::NotActive {
                requested: DeviceMode::Playing,
                current: DeviceMode::Standby,
            }
            .code(),
            SessionErrorCodes::NOT_ACTIVE
        );
        assert_eq!(
            SessionError::MissingFile {
                name: "NORMHB.RAW".to_string()
            }
            .code(),
            SessionErrorCodes::MISSING_FILE
        );
        assert_eq!(
            SessionError::WrongInputSource {
                required: InputSource::Microphone
            }
            .code(),
            SessionErrorCodes::WRONG_INPUT_SOURCE
        );
    }

    #[test]
    fn test_session_error_messages() {
        let err = SessionError::ModeActive {
            current: DeviceMode::Blending,
        };
        assert!(err.message().contains("Blending"));

        let err = SessionError::MissingFile {
            name: "KOROT.RAW".to_string(),
        };
        assert!(err.message().contains("KOROT.RAW"));

        let err = SessionError::StorageUnavailable {
            name: "RECORD.RAW".to_string(),
            reason: "no media".to_string(),
        };
        assert!(err.message().contains("no media"));
    }

    #[test]
    fn test_from_config_error() {
        let config_err = ConfigError::SamplePeriodZero;
        let err: SessionError = config_err.into();
        assert_eq!(err.code(), SessionErrorCodes::INVALID_CONFIG);
        assert!(err.message().contains("Configuration rejected"));
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::NotActive {
            requested: DeviceMode::Recording,
            current: DeviceMode::Standby,
        };
        let display = format!("{}", err);
        assert!(display.contains("SessionError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
