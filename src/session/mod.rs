// Session - exclusive device-mode state machine
//
// Owns the DeviceMode value and the side effects of entering, servicing,
// and leaving each mode: audio routing gains, storage handles for the
// raw capture and the heart-rate log, detector polling, the blend ramp,
// and the shared telemetry payload.
//
// Mode graph: Standby is the hub. Every Start requires Standby and
// every Stop returns to it; stopping a mode that is not active is a
// typed failure that leaves the device untouched. The one exception is
// Blending, which unwinds itself to Standby when its overlay file runs
// out.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::analysis::{DetectorOutput, HeartSoundDetector};
use crate::config::DeviceConfig;
use crate::device::{
    DeviceIo, FileHandle, OpenMode, CH_MIC_LEFT, CH_MIC_RIGHT, CH_PLAYBACK, GAIN_OFF, GAIN_ON,
};
use crate::error::SessionError;
use crate::telemetry::TelemetryFrame;

/// Exclusive operating mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Standby,
    Recording,
    Playing,
    Detecting,
    PassThrough,
    Blending,
}

/// Audio input currently selected by the codec front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Microphone,
    Line,
}

pub struct Session {
    mode: DeviceMode,
    config: DeviceConfig,
    input_source: InputSource,
    detector: HeartSoundDetector,
    blend_level: f32,
    last_poll_ms: u64,
    /// Timestamp base for rate-log records while Recording
    record_epoch_ms: u64,
    beat_count: u64,
    audio_handle: Option<FileHandle>,
    log_handle: Option<FileHandle>,
    frame: Arc<Mutex<TelemetryFrame>>,
}

impl Session {
    /// Create a session in Standby. The configuration is validated
    /// here; a bad threshold ordering never reaches the detector.
    pub fn new(
        config: DeviceConfig,
        frame: Arc<Mutex<TelemetryFrame>>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let detector = HeartSoundDetector::new(config.detection.clone());
        Ok(Self {
            mode: DeviceMode::Standby,
            config,
            input_source: InputSource::Microphone,
            detector,
            blend_level: 1.0,
            last_poll_ms: 0,
            record_epoch_ms: 0,
            beat_count: 0,
            audio_handle: None,
            log_handle: None,
            frame,
        })
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// True while a mode that transmits telemetry frames is active.
    pub fn is_streaming(&self) -> bool {
        matches!(self.mode, DeviceMode::Recording | DeviceMode::Detecting)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn input_source(&self) -> InputSource {
        self.input_source
    }

    pub fn set_input_source(&mut self, source: InputSource) {
        self.input_source = source;
    }

    /// Current published heart-rate estimate.
    pub fn heart_rate(&self) -> Option<u32> {
        self.detector.heart_rate()
    }

    /// Beats confirmed since the session was created.
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Current microphone-channel gain while Blending.
    pub fn blend_level(&self) -> f32 {
        self.blend_level
    }

    /// Swap in a new configuration. Only legal in Standby, and only
    /// after the replacement validates.
    pub fn replace_config(&mut self, config: DeviceConfig) -> Result<(), SessionError> {
        self.require_standby()?;
        config.validate()?;
        self.detector = HeartSoundDetector::new(config.detection.clone());
        self.config = config;
        info!("[Session] configuration replaced");
        Ok(())
    }

    //
    // Recording
    //

    pub fn start_recording(
        &mut self,
        io: &mut DeviceIo,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        self.require_standby()?;

        let audio_name = self.config.files.record_file.clone();
        let log_name = self.config.files.rate_log_file.clone();

        // Stale targets from an earlier session are replaced outright.
        remove_if_present(io, &audio_name)?;
        remove_if_present(io, &log_name)?;

        let audio_handle = io
            .storage
            .open(&audio_name, OpenMode::Write)
            .map_err(|err| storage_error(&audio_name, &err))?;
        let log_handle = match io.storage.open(&log_name, OpenMode::Write) {
            Ok(handle) => handle,
            Err(err) => {
                // Both files open together or not at all.
                if let Err(close_err) = io.storage.close(audio_handle) {
                    warn!("[Session] failed to unwind {}: {}", audio_name, close_err);
                }
                return Err(storage_error(&log_name, &err));
            }
        };

        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);
        io.capture.begin();

        self.detector.reset(now_ms);
        self.last_poll_ms = now_ms;
        self.record_epoch_ms = now_ms;
        self.audio_handle = Some(audio_handle);
        self.log_handle = Some(log_handle);
        self.mode = DeviceMode::Recording;

        info!(
            "[Session] recording to {} / {} (threshold {:.2}, S1-S2 window {}..{} ms)",
            audio_name,
            log_name,
            self.config.detection.signal_threshold,
            self.config.detection.min_s1s2_ms,
            self.config.detection.max_s1s2_ms
        );
        Ok(())
    }

    pub fn stop_recording(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        if self.mode != DeviceMode::Recording {
            return Err(SessionError::NotActive {
                requested: DeviceMode::Recording,
                current: self.mode,
            });
        }

        io.capture.end();

        // Flush-then-close: whatever the queue still holds reaches
        // storage before the handles go away.
        if let Some(handle) = self.audio_handle {
            while io.capture.blocks_available() > 0 {
                let block = io.capture.read_block();
                if let Err(err) = io.storage.append(handle, &block) {
                    warn!("[Session] flush write failed: {}", err);
                    break;
                }
            }
        }
        self.close_recording_handles(io);

        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);

        self.mode = DeviceMode::Standby;
        info!("[Session] recording stopped");
        Ok(())
    }

    fn continue_recording(&mut self, io: &mut DeviceIo, now_ms: u64) {
        // One two-block chunk per tick keeps the write bounded so
        // command processing is never starved.
        if io.capture.blocks_available() >= 2 {
            if let Some(handle) = self.audio_handle {
                let mut chunk = io.capture.read_block();
                chunk.extend_from_slice(&io.capture.read_block());
                if let Err(err) = io.storage.append(handle, &chunk) {
                    warn!("[Session] capture write failed: {}", err);
                }
            }
        }

        if let Some(output) = self.poll_detector(io, now_ms) {
            self.publish_rate(output.heart_rate);
            if output.beat_confirmed {
                self.beat_count += 1;
                if let Some(handle) = self.log_handle {
                    let line = format!(
                        "{},{}\r\n",
                        output.heart_rate.unwrap_or(0),
                        now_ms.saturating_sub(self.record_epoch_ms)
                    );
                    if let Err(err) = io.storage.append(handle, line.as_bytes()) {
                        warn!("[Session] rate log write failed: {}", err);
                    }
                }
            }
        }
    }

    //
    // Playing
    //

    pub fn start_playing(&mut self, io: &mut DeviceIo, name: &str) -> Result<(), SessionError> {
        self.require_standby()?;
        if !io.storage.exists(name) {
            return Err(SessionError::MissingFile {
                name: name.to_string(),
            });
        }

        io.mixer.set_gain(CH_MIC_LEFT, GAIN_OFF);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_OFF);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_ON);
        io.playback
            .play(name)
            .map_err(|err| storage_error(name, &err))?;

        self.mode = DeviceMode::Playing;
        info!("[Session] playing {}", name);
        Ok(())
    }

    pub fn stop_playing(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        if self.mode != DeviceMode::Playing {
            return Err(SessionError::NotActive {
                requested: DeviceMode::Playing,
                current: self.mode,
            });
        }

        io.playback.stop();
        self.restore_default_gains(io);
        self.mode = DeviceMode::Standby;
        info!("[Session] playback stopped");
        Ok(())
    }

    fn continue_playing(&mut self, io: &mut DeviceIo) {
        // The playback collaborator is quiesced once the file runs out;
        // the mode still waits for an explicit stop command.
        if !io.playback.is_playing() {
            io.playback.stop();
        }
    }

    //
    // Detecting
    //

    pub fn start_detecting(
        &mut self,
        io: &mut DeviceIo,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        self.require_standby()?;
        if self.input_source != InputSource::Microphone {
            return Err(SessionError::WrongInputSource {
                required: InputSource::Microphone,
            });
        }

        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);

        self.detector.reset(now_ms);
        self.last_poll_ms = now_ms;
        self.mode = DeviceMode::Detecting;
        info!("[Session] heartbeat detection started");
        Ok(())
    }

    pub fn stop_detecting(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        if self.mode != DeviceMode::Detecting {
            return Err(SessionError::NotActive {
                requested: DeviceMode::Detecting,
                current: self.mode,
            });
        }

        self.restore_default_gains(io);
        self.mode = DeviceMode::Standby;
        info!("[Session] heartbeat detection stopped");
        Ok(())
    }

    fn continue_detecting(&mut self, io: &mut DeviceIo, now_ms: u64) {
        if let Some(output) = self.poll_detector(io, now_ms) {
            self.publish_rate(output.heart_rate);
            if output.beat_confirmed {
                self.beat_count += 1;
            }
        }
    }

    //
    // Pass-through
    //

    pub fn start_pass_through(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        self.require_standby()?;
        if self.input_source != InputSource::Microphone {
            return Err(SessionError::WrongInputSource {
                required: InputSource::Microphone,
            });
        }

        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);

        self.mode = DeviceMode::PassThrough;
        info!("[Session] audio pass-through started");
        Ok(())
    }

    pub fn stop_pass_through(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        if self.mode != DeviceMode::PassThrough {
            return Err(SessionError::NotActive {
                requested: DeviceMode::PassThrough,
                current: self.mode,
            });
        }

        self.restore_default_gains(io);
        self.mode = DeviceMode::Standby;
        info!("[Session] audio pass-through stopped");
        Ok(())
    }

    //
    // Blending
    //

    pub fn start_blending(&mut self, io: &mut DeviceIo, name: &str) -> Result<(), SessionError> {
        self.require_standby()?;
        if !io.storage.exists(name) {
            return Err(SessionError::MissingFile {
                name: name.to_string(),
            });
        }

        // The ramp starts fully dry: microphone at nominal gain, the
        // overlay muted until continue ticks fade it in.
        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);
        io.playback
            .play(name)
            .map_err(|err| storage_error(name, &err))?;

        self.blend_level = 1.0;
        self.mode = DeviceMode::Blending;
        info!("[Session] blending {}", name);
        Ok(())
    }

    pub fn stop_blending(&mut self, io: &mut DeviceIo) -> Result<(), SessionError> {
        if self.mode != DeviceMode::Blending {
            return Err(SessionError::NotActive {
                requested: DeviceMode::Blending,
                current: self.mode,
            });
        }

        io.playback.stop();
        self.blend_level = 1.0;
        self.restore_default_gains(io);
        self.mode = DeviceMode::Standby;
        info!("[Session] blending stopped");
        Ok(())
    }

    fn continue_blending(&mut self, io: &mut DeviceIo) {
        if !io.playback.is_playing() {
            // Overlay finished on its own: unwind the ramp and return
            // to Standby without waiting for a stop command.
            io.playback.stop();
            self.blend_level = 1.0;
            self.restore_default_gains(io);
            self.mode = DeviceMode::Standby;
            info!("[Session] blend overlay finished, returning to standby");
            return;
        }

        if self.blend_level > self.config.blend.floor {
            self.blend_level =
                (self.blend_level - self.config.blend.step).max(self.config.blend.floor);
            io.mixer.set_gain(CH_MIC_LEFT, self.blend_level);
            io.mixer.set_gain(CH_MIC_RIGHT, self.blend_level);
            io.mixer.set_gain(CH_PLAYBACK, 1.0 - self.blend_level);
        }
    }

    //
    // Per-tick servicing
    //

    /// Advance the active mode's per-tick work. Bounded: each call does
    /// at most one storage chunk, one detector poll, one ramp step.
    pub fn continue_active(&mut self, io: &mut DeviceIo, now_ms: u64) {
        match self.mode {
            DeviceMode::Standby => {}
            DeviceMode::Recording => self.continue_recording(io, now_ms),
            DeviceMode::Playing => self.continue_playing(io),
            DeviceMode::Detecting => self.continue_detecting(io, now_ms),
            DeviceMode::PassThrough => {}
            DeviceMode::Blending => self.continue_blending(io),
        }
    }

    fn poll_detector(&mut self, io: &mut DeviceIo, now_ms: u64) -> Option<DetectorOutput> {
        if now_ms.saturating_sub(self.last_poll_ms)
            < u64::from(self.config.detection.sample_period_ms)
        {
            return None;
        }
        self.last_poll_ms = now_ms;
        let sample = if io.sampler.available() {
            Some(io.sampler.read())
        } else {
            None
        };
        Some(self.detector.observe(now_ms, sample))
    }

    fn publish_rate(&self, rate: Option<u32>) {
        let mut frame = self.frame.lock().expect("telemetry frame poisoned");
        frame.set_heart_rate(rate);
    }

    fn close_recording_handles(&mut self, io: &mut DeviceIo) {
        if let Some(handle) = self.audio_handle.take() {
            if let Err(err) = io.storage.close(handle) {
                warn!("[Session] closing capture file failed: {}", err);
            }
        }
        if let Some(handle) = self.log_handle.take() {
            if let Err(err) = io.storage.close(handle) {
                warn!("[Session] closing rate log failed: {}", err);
            }
        }
    }

    fn restore_default_gains(&self, io: &mut DeviceIo) {
        io.mixer.set_gain(CH_MIC_LEFT, GAIN_ON);
        io.mixer.set_gain(CH_MIC_RIGHT, GAIN_ON);
        io.mixer.set_gain(CH_PLAYBACK, GAIN_OFF);
    }

    fn require_standby(&self) -> Result<(), SessionError> {
        if self.mode != DeviceMode::Standby {
            return Err(SessionError::ModeActive { current: self.mode });
        }
        Ok(())
    }
}

fn remove_if_present(io: &mut DeviceIo, name: &str) -> Result<(), SessionError> {
    if io.storage.exists(name) {
        io.storage
            .remove(name)
            .map_err(|err| storage_error(name, &err))?;
    }
    Ok(())
}

fn storage_error(name: &str, err: &std::io::Error) -> SessionError {
    SessionError::StorageUnavailable {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
