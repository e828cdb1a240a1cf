// Simulated collaborators for deterministic tests and the CLI simulator.
//
// Every sim is a cheap clone sharing interior state, so a test can keep
// a handle while the engine owns the boxed trait object: push inbound
// bytes, script amplitude readings, then assert on gains, stored bytes,
// and outbound traffic after ticking.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    CaptureQueue, FileHandle, Mixer, OpenMode, PeakSampler, Playback, Storage, TimeSource,
    Transport,
};

/// Manually advanced clock for deterministic scheduling in tests.
#[derive(Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Scripted peak sampler fed from a queue of readings.
#[derive(Clone, Default)]
pub struct SimSampler {
    queue: Arc<Mutex<VecDeque<f32>>>,
}

impl SimSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, amplitude: f32) {
        self.queue
            .lock()
            .expect("sampler queue poisoned")
            .push_back(amplitude);
    }
}

impl PeakSampler for SimSampler {
    fn available(&self) -> bool {
        !self.queue.lock().expect("sampler queue poisoned").is_empty()
    }

    fn read(&mut self) -> f32 {
        self.queue
            .lock()
            .expect("sampler queue poisoned")
            .pop_front()
            .unwrap_or(0.0)
    }
}

#[derive(Default)]
struct SimCaptureInner {
    running: bool,
    blocks: VecDeque<Vec<u8>>,
}

/// In-memory capture queue; tests enqueue blocks while "recording".
#[derive(Clone, Default)]
pub struct SimCapture {
    inner: Arc<Mutex<SimCaptureInner>>,
}

impl SimCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue one raw block as the audio pipeline would.
    pub fn push_block(&self, block: Vec<u8>) {
        let mut inner = self.inner.lock().expect("capture queue poisoned");
        if inner.running {
            inner.blocks.push_back(block);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().expect("capture queue poisoned").running
    }
}

impl CaptureQueue for SimCapture {
    fn begin(&mut self) {
        self.inner.lock().expect("capture queue poisoned").running = true;
    }

    fn end(&mut self) {
        self.inner.lock().expect("capture queue poisoned").running = false;
    }

    fn blocks_available(&self) -> usize {
        self.inner.lock().expect("capture queue poisoned").blocks.len()
    }

    fn read_block(&mut self) -> Vec<u8> {
        self.inner
            .lock()
            .expect("capture queue poisoned")
            .blocks
            .pop_front()
            .unwrap_or_default()
    }
}

/// Mixer recording the latest gain per channel.
#[derive(Clone, Default)]
pub struct SimMixer {
    gains: Arc<Mutex<HashMap<usize, f32>>>,
}

impl SimMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest gain applied to a channel (0.0 if never set).
    pub fn gain(&self, channel: usize) -> f32 {
        self.gains
            .lock()
            .expect("mixer gains poisoned")
            .get(&channel)
            .copied()
            .unwrap_or(0.0)
    }
}

impl Mixer for SimMixer {
    fn set_gain(&mut self, channel: usize, level: f32) {
        self.gains
            .lock()
            .expect("mixer gains poisoned")
            .insert(channel, level);
    }
}

#[derive(Default)]
struct SimPlaybackInner {
    current: Option<String>,
    finished: bool,
}

/// Playback collaborator whose completion is scripted by the test.
#[derive(Clone, Default)]
pub struct SimPlayback {
    inner: Arc<Mutex<SimPlaybackInner>>,
}

impl SimPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the current sound as finished, as hardware would when the
    /// file runs out.
    pub fn finish(&self) {
        self.inner.lock().expect("playback poisoned").finished = true;
    }

    pub fn current(&self) -> Option<String> {
        self.inner.lock().expect("playback poisoned").current.clone()
    }
}

impl Playback for SimPlayback {
    fn play(&mut self, name: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("playback poisoned");
        inner.current = Some(name.to_string());
        inner.finished = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        let inner = self.inner.lock().expect("playback poisoned");
        inner.current.is_some() && !inner.finished
    }

    fn stop(&mut self) {
        let mut inner = self.inner.lock().expect("playback poisoned");
        inner.current = None;
        inner.finished = false;
    }
}

struct OpenFile {
    name: String,
    mode: OpenMode,
    read_pos: usize,
}

#[derive(Default)]
struct SimStorageInner {
    files: HashMap<String, Vec<u8>>,
    open: HashMap<u64, OpenFile>,
    next_handle: u64,
}

/// In-memory storage with full handle-lifecycle bookkeeping.
#[derive(Clone, Default)]
pub struct SimStorage {
    inner: Arc<Mutex<SimStorageInner>>,
}

impl SimStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a stored sound for playback/blending tests.
    pub fn put(&self, name: &str, bytes: Vec<u8>) {
        self.inner
            .lock()
            .expect("storage poisoned")
            .files
            .insert(name.to_string(), bytes);
    }

    /// Current contents of a stored file, if it exists.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .expect("storage poisoned")
            .files
            .get(name)
            .cloned()
    }

    /// Number of handles still open; zero after a clean stop.
    pub fn open_handles(&self) -> usize {
        self.inner.lock().expect("storage poisoned").open.len()
    }
}

impl Storage for SimStorage {
    fn exists(&self, name: &str) -> bool {
        self.inner
            .lock()
            .expect("storage poisoned")
            .files
            .contains_key(name)
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<FileHandle> {
        let mut inner = self.inner.lock().expect("storage poisoned");
        match mode {
            OpenMode::Read => {
                if !inner.files.contains_key(name) {
                    return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()));
                }
            }
            OpenMode::Write => {
                inner.files.entry(name.to_string()).or_default();
            }
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.open.insert(
            handle,
            OpenFile {
                name: name.to_string(),
                mode,
                read_pos: 0,
            },
        );
        Ok(FileHandle(handle))
    }

    fn append(&mut self, handle: FileHandle, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("storage poisoned");
        let name = match inner.open.get(&handle.0) {
            Some(open) if open.mode == OpenMode::Write => open.name.clone(),
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "handle opened read-only",
                ))
            }
            None => return Err(io::Error::new(io::ErrorKind::InvalidInput, "stale handle")),
        };
        inner
            .files
            .get_mut(&name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.clone()))?
            .extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("storage poisoned");
        let (name, pos) = match inner.open.get(&handle.0) {
            Some(open) => (open.name.clone(), open.read_pos),
            None => return Err(io::Error::new(io::ErrorKind::InvalidInput, "stale handle")),
        };
        let data = inner
            .files
            .get(&name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.clone()))?;
        let remaining = data.len().saturating_sub(pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        if let Some(open) = inner.open.get_mut(&handle.0) {
            open.read_pos += n;
        }
        Ok(n)
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("storage poisoned");
        match inner.files.remove(name) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, name.to_string())),
        }
    }

    fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("storage poisoned");
        match inner.open.remove(&handle.0) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "stale handle")),
        }
    }
}

#[derive(Default)]
struct SimTransportInner {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

/// Byte channel with scripted inbound traffic and captured outbound.
#[derive(Clone, Default)]
pub struct SimTransport {
    inner: Arc<Mutex<SimTransportInner>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the controller had sent them.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inner
            .lock()
            .expect("transport poisoned")
            .inbound
            .extend(bytes.iter().copied());
    }

    /// Drain everything the device transmitted so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().expect("transport poisoned").outbound)
    }
}

impl Transport for SimTransport {
    fn available(&self) -> usize {
        self.inner.lock().expect("transport poisoned").inbound.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inner
            .lock()
            .expect("transport poisoned")
            .inbound
            .pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.inner
            .lock()
            .expect("transport poisoned")
            .outbound
            .extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_only_queues_while_running() {
        let capture = SimCapture::new();
        capture.push_block(vec![1; 256]);
        assert_eq!(capture.blocks_available(), 0);

        let mut queue: Box<dyn CaptureQueue> = Box::new(capture.clone());
        queue.begin();
        capture.push_block(vec![2; 256]);
        assert_eq!(queue.blocks_available(), 1);
        assert_eq!(queue.read_block()[0], 2);
    }

    #[test]
    fn test_storage_handle_lifecycle() {
        let storage = SimStorage::new();
        let mut dyn_storage: Box<dyn Storage> = Box::new(storage.clone());

        let handle = dyn_storage.open("A.RAW", OpenMode::Write).unwrap();
        dyn_storage.append(handle, b"abc").unwrap();
        assert_eq!(storage.open_handles(), 1);
        dyn_storage.close(handle).unwrap();
        assert_eq!(storage.open_handles(), 0);
        assert_eq!(storage.contents("A.RAW").unwrap(), b"abc");

        // Reads resume where they left off.
        let handle = dyn_storage.open("A.RAW", OpenMode::Read).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(dyn_storage.read(handle, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(dyn_storage.read(handle, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(dyn_storage.read(handle, &mut buf).unwrap(), 0);
        dyn_storage.close(handle).unwrap();
    }

    #[test]
    fn test_storage_rejects_stale_handles() {
        let mut storage: Box<dyn Storage> = Box::new(SimStorage::new());
        let handle = storage.open("A.RAW", OpenMode::Write).unwrap();
        storage.close(handle).unwrap();
        assert!(storage.append(handle, b"x").is_err());
        assert!(storage.close(handle).is_err());
    }

    #[test]
    fn test_playback_finish_scripting() {
        let playback = SimPlayback::new();
        let mut dyn_playback: Box<dyn Playback> = Box::new(playback.clone());

        dyn_playback.play("NORMHB.RAW").unwrap();
        assert!(dyn_playback.is_playing());
        playback.finish();
        assert!(!dyn_playback.is_playing());
    }

    #[test]
    fn test_transport_roundtrip() {
        let transport = SimTransport::new();
        let mut dyn_transport: Box<dyn Transport> = Box::new(transport.clone());

        transport.push_inbound(&[0x05, 0x16]);
        assert_eq!(dyn_transport.available(), 2);
        assert_eq!(dyn_transport.read_byte(), Some(0x05));

        dyn_transport.write(&[0x06]);
        assert_eq!(transport.take_outbound(), vec![0x06]);
        assert!(transport.take_outbound().is_empty());
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance(40);
        clock.advance(40);
        assert_eq!(clock.now_ms(), 80);
        clock.set(1000);
        assert_eq!(clock.now_ms(), 1000);
    }
}
