//! Outbound telemetry frame shared by the session and the dispatcher.
//!
//! The frame is created once at startup and mutated in place: the
//! session owns the payload string, the dispatcher owns sequencing and
//! transmission scheduling. Each transmission is one JSON line on the
//! command transport.

use serde::{Deserialize, Serialize};

/// Identifies the transmitting device class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTag {
    Stethoscope,
}

/// Identifies the measurement carried in the payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    HeartRate,
}

/// Periodic status record describing the current heart rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryFrame {
    /// Incremented by the dispatcher on every transmission
    pub sequence_id: u32,
    pub device: DeviceTag,
    pub event: EventTag,
    /// Numeric heart-rate string; "0" until an estimate exists
    pub payload: String,
}

impl TelemetryFrame {
    pub fn new() -> Self {
        Self {
            sequence_id: 0,
            device: DeviceTag::Stethoscope,
            event: EventTag::HeartRate,
            payload: "0".to_string(),
        }
    }

    /// Render a rate estimate into the payload; a stale or absent
    /// estimate renders as "0".
    pub fn set_heart_rate(&mut self, rate: Option<u32>) {
        self.payload = rate.unwrap_or(0).to_string();
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn encode_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_reports_zero_rate() {
        let frame = TelemetryFrame::new();
        assert_eq!(frame.sequence_id, 0);
        assert_eq!(frame.payload, "0");
    }

    #[test]
    fn test_set_heart_rate() {
        let mut frame = TelemetryFrame::new();
        frame.set_heart_rate(Some(72));
        assert_eq!(frame.payload, "72");

        frame.set_heart_rate(None);
        assert_eq!(frame.payload, "0");
    }

    #[test]
    fn test_encode_line_roundtrip() {
        let mut frame = TelemetryFrame::new();
        frame.sequence_id = 7;
        frame.set_heart_rate(Some(64));

        let line = frame.encode_line();
        assert_eq!(*line.last().unwrap(), b'\n');

        let parsed: TelemetryFrame = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(parsed, frame);
    }
}
