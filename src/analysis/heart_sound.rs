// HeartSoundDetector - S1/S2 heart-sound pair classification
//
// Classifies a noisy peak-amplitude stream into heartbeat events by
// tracking rest/active transitions against a fixed signal threshold.
// A beat is confirmed when a second heard interval begins within the
// configured S1-S2 window of the first.
//
// State per sample:
// - at_rest: amplitude below threshold on the latest sample
// - transitioning: at_rest flipped relative to the previous sample
// - awaiting_second: a candidate first sound has ended and the detector
//   is waiting for the second sound of the pair
//
// Interval timers are realized as monotonic millisecond marks; the
// clock is supplied by the caller on every poll, so the classifier is
// independent of any particular timer hardware.

use log::debug;

use crate::analysis::heart_rate::RateAverager;
use crate::config::DetectionConfig;

/// Result of one detector poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOutput {
    /// True on the sample that completed an S1/S2 pair
    pub beat_confirmed: bool,
    /// Current rolling heart-rate estimate, if one has been published
    pub heart_rate: Option<u32>,
}

/// Finite-state classifier over amplitude-threshold crossings
#[derive(Debug)]
pub struct HeartSoundDetector {
    config: DetectionConfig,
    at_rest: bool,
    awaiting_second: bool,
    /// Interval captured on entry into a candidate first sound
    candidate_interval_ms: u64,
    /// Start of the most recent candidate first sound; `None` until one
    /// has been observed since the last reset
    trigger_mark_ms: Option<u64>,
    /// Start of the current rest span; `None` means the detector has
    /// been at rest since before monitoring began
    rest_mark_ms: Option<u64>,
    /// Time of the previous confirmed beat (or of the last reset)
    beat_mark_ms: u64,
    averager: RateAverager,
    rate: Option<u32>,
}

impl HeartSoundDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            at_rest: true,
            awaiting_second: false,
            candidate_interval_ms: 0,
            trigger_mark_ms: None,
            rest_mark_ms: None,
            beat_mark_ms: 0,
            averager: RateAverager::new(),
            rate: None,
        }
    }

    /// Rebaseline all marks and state (called on mode entry).
    pub fn reset(&mut self, now_ms: u64) {
        self.at_rest = true;
        self.awaiting_second = false;
        self.candidate_interval_ms = 0;
        self.trigger_mark_ms = None;
        self.rest_mark_ms = None;
        self.beat_mark_ms = now_ms;
        self.averager.clear();
        self.rate = None;
    }

    /// Consume one amplitude reading, or advance timers when none is
    /// available.
    ///
    /// # Arguments
    /// * `now_ms` - Monotonic milliseconds from the injected clock
    /// * `sample` - Normalized peak amplitude in [0, 1], if one arrived
    ///
    /// # Returns
    /// Whether this sample completed an S1/S2 pair, plus the current
    /// rolling estimate (updated only when a third inter-beat interval
    /// accumulates).
    pub fn observe(&mut self, now_ms: u64, sample: Option<f32>) -> DetectorOutput {
        let Some(amplitude) = sample else {
            // Transient signal gaps are not errors; time still passes.
            self.apply_staleness(now_ms);
            return DetectorOutput {
                beat_confirmed: false,
                heart_rate: self.rate,
            };
        };

        let heard = amplitude >= self.config.signal_threshold;
        let was_at_rest = self.at_rest;
        self.at_rest = !heard;
        let transitioning = self.at_rest != was_at_rest;

        let mut beat_confirmed = false;

        if transitioning && !self.at_rest && !self.awaiting_second {
            // Entering a (potential) first heart sound
            if self.rest_elapsed(now_ms) > u64::from(self.config.min_s1s2_ms) {
                self.candidate_interval_ms =
                    now_ms.saturating_sub(self.trigger_mark_ms.unwrap_or(0));
                self.trigger_mark_ms = Some(now_ms);
            }
        } else if transitioning && self.at_rest && !self.awaiting_second {
            // Leaving the first sound; the pair is now open
            self.awaiting_second = true;
            self.rest_mark_ms = Some(now_ms);
        } else if transitioning && !self.at_rest && self.awaiting_second {
            // Entering a (potential) second heart sound: the pair
            // qualifies as a beat if the S1-S2 separation falls within
            // the defined range
            let separation = self.trigger_elapsed(now_ms);
            if separation >= u64::from(self.config.min_s1s2_ms)
                && separation <= u64::from(self.config.max_s1s2_ms)
            {
                beat_confirmed = true;
                debug!(
                    "[Detector] beat confirmed, S1-S2 separation {} ms",
                    separation
                );
            }
        } else if transitioning && self.at_rest && self.awaiting_second {
            // Pair closed without confirmation. The rest timer keeps
            // running from the end of the first sound.
            self.awaiting_second = false;
            self.candidate_interval_ms = 0;
        } else if !transitioning
            && self.at_rest
            && self.rest_elapsed(now_ms) > u64::from(self.config.max_s1s2_ms)
        {
            // Second sound never arrived; drop the open pair
            self.awaiting_second = false;
        }

        if beat_confirmed {
            let interval = now_ms.saturating_sub(self.beat_mark_ms);
            self.beat_mark_ms = now_ms;
            if let Some(rate) = self.averager.push(interval.min(u64::from(u32::MAX)) as u32) {
                self.rate = Some(rate);
                debug!("[Detector] published heart rate {} bpm", rate);
            }
        }

        self.apply_staleness(now_ms);
        DetectorOutput {
            beat_confirmed,
            heart_rate: self.rate,
        }
    }

    /// True while the latest sample was below threshold.
    pub fn at_rest(&self) -> bool {
        self.at_rest
    }

    /// True while a first sound has ended and a second is expected.
    pub fn awaiting_second(&self) -> bool {
        self.awaiting_second
    }

    /// Current published estimate, if any.
    pub fn heart_rate(&self) -> Option<u32> {
        self.rate
    }

    /// Interval captured on entry into the latest candidate first sound.
    pub fn candidate_interval_ms(&self) -> u64 {
        self.candidate_interval_ms
    }

    fn rest_elapsed(&self, now_ms: u64) -> u64 {
        match self.rest_mark_ms {
            Some(mark) => now_ms.saturating_sub(mark),
            // At rest since before monitoring began.
            None => u64::MAX,
        }
    }

    fn trigger_elapsed(&self, now_ms: u64) -> u64 {
        match self.trigger_mark_ms {
            Some(mark) => now_ms.saturating_sub(mark),
            None => u64::MAX,
        }
    }

    fn apply_staleness(&mut self, now_ms: u64) {
        if self.rate.is_some()
            && now_ms.saturating_sub(self.beat_mark_ms) > u64::from(self.config.max_beat_gap_ms)
        {
            debug!("[Detector] no beat within the staleness gap, clearing rate");
            self.rate = None;
        }
    }
}
