// Host-side collaborator implementations.
//
// FsStorage maps the storage seam onto a directory of plain files, so
// host tooling and soak tests exercise the same session code paths a
// device build would. RingSampler carries peak readings across the
// audio-callback boundary over a lock-free SPSC ring: the producer side
// lives on the sampling thread, the consumer side is polled from the
// tick loop, and neither ever blocks.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use super::{FileHandle, OpenMode, PeakSampler, Storage};

/// Filesystem-backed storage rooted at a directory.
pub struct FsStorage {
    root: PathBuf,
    handles: HashMap<u64, File>,
    next_handle: u64,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn file_mut(&mut self, handle: FileHandle) -> io::Result<&mut File> {
        self.handles
            .get_mut(&handle.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "stale handle"))
    }
}

impl Storage for FsStorage {
    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<FileHandle> {
        let file = match mode {
            OpenMode::Read => File::open(self.path(name))?,
            OpenMode::Write => OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path(name))?,
        };
        self.next_handle += 1;
        let handle = self.next_handle;
        self.handles.insert(handle, file);
        Ok(FileHandle(handle))
    }

    fn append(&mut self, handle: FileHandle, bytes: &[u8]) -> io::Result<()> {
        self.file_mut(handle)?.write_all(bytes)
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize> {
        self.file_mut(handle)?.read(buf)
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        std::fs::remove_file(self.path(name))
    }

    fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        match self.handles.remove(&handle.0) {
            // Dropping the File flushes and closes it.
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "stale handle")),
        }
    }
}

/// Producer half of the peak handoff, owned by the sampling thread.
pub struct PeakProducer {
    tx: rtrb::Producer<f32>,
}

impl PeakProducer {
    /// Push one reading; returns false when the consumer has fallen
    /// behind and the ring is full (the reading is dropped).
    pub fn push(&mut self, amplitude: f32) -> bool {
        self.tx.push(amplitude).is_ok()
    }
}

/// Consumer half of the peak handoff, polled from the tick loop.
pub struct RingSampler {
    rx: rtrb::Consumer<f32>,
}

/// Create a connected producer/sampler pair over a lock-free SPSC ring.
pub fn ring_sampler(capacity: usize) -> (PeakProducer, RingSampler) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    (PeakProducer { tx }, RingSampler { rx })
}

impl PeakSampler for RingSampler {
    fn available(&self) -> bool {
        !self.rx.is_empty()
    }

    fn read(&mut self) -> f32 {
        self.rx.pop().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_sampler_handoff() {
        let (mut producer, mut sampler) = ring_sampler(4);
        assert!(!sampler.available());

        assert!(producer.push(0.25));
        assert!(producer.push(0.5));
        assert!(sampler.available());
        assert_eq!(sampler.read(), 0.25);
        assert_eq!(sampler.read(), 0.5);
        assert!(!sampler.available());
    }

    #[test]
    fn test_ring_sampler_drops_when_full() {
        let (mut producer, mut sampler) = ring_sampler(2);
        assert!(producer.push(0.1));
        assert!(producer.push(0.2));
        assert!(!producer.push(0.3));

        assert_eq!(sampler.read(), 0.1);
        assert!(producer.push(0.4));
    }

    #[test]
    fn test_fs_storage_lifecycle() {
        let root = std::env::temp_dir().join("steth_fs_storage_test");
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();

        let mut storage = FsStorage::new(&root);
        assert!(!storage.exists("REC.RAW"));

        let handle = storage.open("REC.RAW", OpenMode::Write).unwrap();
        storage.append(handle, b"hello").unwrap();
        storage.close(handle).unwrap();
        assert!(storage.exists("REC.RAW"));

        let handle = storage.open("REC.RAW", OpenMode::Read).unwrap();
        let mut buf = [0u8; 16];
        let n = storage.read(handle, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        storage.close(handle).unwrap();

        storage.remove("REC.RAW").unwrap();
        assert!(!storage.exists("REC.RAW"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
