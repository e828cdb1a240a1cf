//! Device and session configuration
//!
//! This module provides runtime configuration loading from JSON files,
//! so detection thresholds and file-naming parameters can be adjusted
//! without reflashing a device or rebuilding the host tools. Threshold
//! ordering is validated strictly before a session may use a config;
//! the detector never clamps a bad window at runtime.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Complete device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub detection: DetectionConfig,
    pub files: FileConfig,
    pub blend: BlendConfig,
    /// Interval between telemetry frame transmissions while streaming
    pub telemetry_interval_ms: u64,
}

/// Heart-sound detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Normalized amplitude at or above which a sound is "heard"
    pub signal_threshold: f32,
    /// Minimum S1-S2 separation in milliseconds
    pub min_s1s2_ms: u32,
    /// Maximum S1-S2 separation in milliseconds
    pub max_s1s2_ms: u32,
    /// Silence span after which the rate estimate is stale
    pub max_beat_gap_ms: u32,
    /// Peak-sampler polling cadence
    pub sample_period_ms: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            signal_threshold: 0.30,
            // must be greater-than 100ms
            min_s1s2_ms: 120,
            // must be less-than 400ms
            max_s1s2_ms: 350,
            max_beat_gap_ms: 5000,
            sample_period_ms: 40,
        }
    }
}

impl DetectionConfig {
    /// Reject threshold orderings the detector cannot classify against.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.signal_threshold > 0.0 && self.signal_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange {
                value: self.signal_threshold,
            });
        }
        if self.min_s1s2_ms >= self.max_s1s2_ms {
            return Err(ConfigError::IntervalOrdering {
                min_ms: self.min_s1s2_ms,
                max_ms: self.max_s1s2_ms,
            });
        }
        if self.max_beat_gap_ms <= self.max_s1s2_ms {
            return Err(ConfigError::BeatGapTooShort {
                gap_ms: self.max_beat_gap_ms,
                max_s1s2_ms: self.max_s1s2_ms,
            });
        }
        if self.sample_period_ms == 0 {
            return Err(ConfigError::SamplePeriodZero);
        }
        Ok(())
    }
}

/// Storage targets used by the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Raw audio capture written while recording
    pub record_file: String,
    /// Append-only heart-rate log written while recording
    pub rate_log_file: String,
    /// Bundled synthetic normal heart beat, blended on command
    pub normal_hb_file: String,
    /// Bundled early systolic murmur, blended on command
    pub early_murmur_file: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            record_file: "RECORD.RAW".to_string(),
            rate_log_file: "HRATE.DAT".to_string(),
            normal_hb_file: "NORMHB.RAW".to_string(),
            early_murmur_file: "ESHMUR.RAW".to_string(),
        }
    }
}

/// Crossfade ramp parameters for Blending mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendConfig {
    /// Lowest gain the microphone channels decay to
    pub floor: f32,
    /// Gain decrement applied per scheduler tick
    pub step: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            floor: 0.10,
            step: 0.000_005,
        }
    }
}

impl BlendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.floor > 0.0 && self.floor < 1.0) || self.step <= 0.0 {
            return Err(ConfigError::BlendOutOfRange {
                floor: self.floor,
                step: self.step,
            });
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            files: FileConfig::default(),
            blend: BlendConfig::default(),
            telemetry_interval_ms: 1000,
        }
    }
}

impl DeviceConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing
    /// or malformed. Call [`validate`](Self::validate) before handing the
    /// result to a session.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Validate every section. Invalid configs are rejected outright,
    /// never silently clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.validate()?;
        self.blend.validate()
    }
}
