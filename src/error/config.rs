// Configuration error types and constants

use crate::error::ErrorCode;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 2101-2105
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// Signal threshold outside (0, 1]
    pub const THRESHOLD_OUT_OF_RANGE: i32 = 2101;

    /// Minimum S1-S2 interval is not below the maximum
    pub const INTERVAL_ORDERING: i32 = 2102;

    /// Staleness gap does not exceed the S1-S2 window
    pub const BEAT_GAP_TOO_SHORT: i32 = 2103;

    /// Blend floor or step outside their valid ranges
    pub const BLEND_OUT_OF_RANGE: i32 = 2104;

    /// Sampler polling cadence of zero
    pub const SAMPLE_PERIOD_ZERO: i32 = 2105;
}

/// Configuration validation errors
///
/// Raised when a session is configured, never during detection: the
/// detector assumes its thresholds are well ordered.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Signal threshold outside (0, 1]
    ThresholdOutOfRange { value: f32 },

    /// Minimum S1-S2 interval is not below the maximum
    IntervalOrdering { min_ms: u32, max_ms: u32 },

    /// Staleness gap does not exceed the S1-S2 window
    BeatGapTooShort { gap_ms: u32, max_s1s2_ms: u32 },

    /// Blend floor or step outside their valid ranges
    BlendOutOfRange { floor: f32, step: f32 },

    /// Sampler polling cadence of zero
    SamplePeriodZero,
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::ThresholdOutOfRange { .. } => ConfigErrorCodes::THRESHOLD_OUT_OF_RANGE,
            ConfigError::IntervalOrdering { .. } => ConfigErrorCodes::INTERVAL_ORDERING,
            ConfigError::BeatGapTooShort { .. } => ConfigErrorCodes::BEAT_GAP_TOO_SHORT,
            ConfigError::BlendOutOfRange { .. } => ConfigErrorCodes::BLEND_OUT_OF_RANGE,
            ConfigError::SamplePeriodZero => ConfigErrorCodes::SAMPLE_PERIOD_ZERO,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::ThresholdOutOfRange { value } => {
                format!("Signal threshold must be in (0, 1] (got {})", value)
            }
            ConfigError::IntervalOrdering { min_ms, max_ms } => {
                format!(
                    "Minimum S1-S2 interval {} ms must be below maximum {} ms",
                    min_ms, max_ms
                )
            }
            ConfigError::BeatGapTooShort { gap_ms, max_s1s2_ms } => {
                format!(
                    "Staleness gap {} ms must exceed the S1-S2 maximum {} ms",
                    gap_ms, max_s1s2_ms
                )
            }
            ConfigError::BlendOutOfRange { floor, step } => {
                format!(
                    "Blend floor must be in (0, 1) and step positive (got floor {}, step {})",
                    floor, step
                )
            }
            ConfigError::SamplePeriodZero => {
                "Sampler polling cadence must be non-zero".to_string()
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ConfigError {}
