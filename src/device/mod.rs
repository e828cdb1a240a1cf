//! Hardware-collaborator seams for the device core.
//!
//! The core never touches hardware directly: the sampling pipeline,
//! storage, audio routing, playback, and the command transport are all
//! reached through the traits here. State machines can then be driven
//! deterministically by the simulated implementations in [`sim`], while
//! [`host`] provides filesystem- and ring-buffer-backed variants for
//! host-side tooling.

use std::io;
use std::time::Instant;

pub mod host;
pub mod sim;

/// Mixer channel carrying the left microphone signal.
pub const CH_MIC_LEFT: usize = 0;
/// Mixer channel carrying the right microphone signal.
pub const CH_MIC_RIGHT: usize = 1;
/// Mixer channel carrying stored-sound playback.
pub const CH_PLAYBACK: usize = 2;

/// Nominal gain for an enabled mixer input.
pub const GAIN_ON: f32 = 0.5;
/// Gain for a muted mixer input.
pub const GAIN_OFF: f32 = 0.0;

/// Opaque handle to an open storage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Access mode for [`Storage::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Periodic peak-amplitude readings from the acoustic front end.
pub trait PeakSampler {
    fn available(&self) -> bool;

    /// Normalized peak amplitude in [0, 1]. Only meaningful when
    /// [`available`](Self::available) reported true this tick.
    fn read(&mut self) -> f32;
}

/// Buffered raw-audio blocks captured while recording.
pub trait CaptureQueue {
    fn begin(&mut self);
    fn end(&mut self);
    fn blocks_available(&self) -> usize;

    /// Remove and return the oldest capture block.
    fn read_block(&mut self) -> Vec<u8>;
}

/// Audio routing matrix.
pub trait Mixer {
    fn set_gain(&mut self, channel: usize, level: f32);
}

/// Timed playback of stored sounds.
pub trait Playback {
    fn play(&mut self, name: &str) -> io::Result<()>;
    fn is_playing(&self) -> bool;
    fn stop(&mut self);
}

/// Append-oriented persistent storage.
///
/// `read` and `remove` go beyond the recording path's needs: file
/// transfer reads stored bytes back out, and both recording start and
/// the storage self-check delete their targets first.
pub trait Storage {
    fn exists(&self, name: &str) -> bool;
    fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<FileHandle>;
    fn append(&mut self, handle: FileHandle, bytes: &[u8]) -> io::Result<()>;
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize>;
    fn remove(&mut self, name: &str) -> io::Result<()>;
    fn close(&mut self, handle: FileHandle) -> io::Result<()>;
}

/// Half-duplex byte channel to the remote controller.
pub trait Transport {
    fn available(&self) -> usize;
    fn read_byte(&mut self) -> Option<u8>;
    fn write(&mut self, bytes: &[u8]);
}

/// Monotonic time source injected into the tick loop.
pub trait TimeSource {
    fn now_ms(&self) -> u64;
}

/// Default time source counting milliseconds since construction.
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Bundle of the collaborators a session operates on.
///
/// Grouping them keeps session and dispatcher signatures stable as
/// platforms swap implementations in and out.
pub struct DeviceIo {
    pub sampler: Box<dyn PeakSampler>,
    pub capture: Box<dyn CaptureQueue>,
    pub mixer: Box<dyn Mixer>,
    pub playback: Box<dyn Playback>,
    pub storage: Box<dyn Storage>,
}
