//! Ring buffer staging canonical audio between the producer callback and the audio pacer

use parking_lot::Mutex;

use crate::pipeline::frame::AudioFrame;

/// Bounded byte ring holding normalized (canonical) audio
///
/// Designed for a single producer (the audio callback) and a single consumer
/// (the audio pacer). The writer never overwrites unread data: bytes that don't
/// fit are dropped. Writes are truncated to whole sample frames so the reader
/// never sees a split stereo frame.
pub struct AudioStagingBuffer {
    ring: Mutex<ByteRing>,
}

struct ByteRing {
    buffer: Vec<u8>,
    /// Next byte to write
    write_pos: usize,
    /// Readable bytes, ending at `write_pos`
    len: usize,
}

impl AudioStagingBuffer {
    const ALIGN: usize = AudioFrame::CANONICAL_FRAME_BYTES;

    /// Create a buffer holding up to `capacity` bytes (rounded down to whole sample frames)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity - capacity % Self::ALIGN;
        Self {
            ring: Mutex::new(ByteRing {
                buffer: vec![0; capacity],
                write_pos: 0,
                len: 0,
            }),
        }
    }

    /// Write as much of `bytes` as fits. Returns the number of bytes written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut ring = self.ring.lock();
        let capacity = ring.buffer.len();
        let free = capacity - ring.len;
        let to_write = bytes.len().min(free);
        let to_write = to_write - to_write % Self::ALIGN;
        if to_write == 0 {
            return 0;
        }

        let start = ring.write_pos;
        let first = to_write.min(capacity - start);
        ring.buffer[start..start + first].copy_from_slice(&bytes[..first]);
        ring.buffer[..to_write - first].copy_from_slice(&bytes[first..to_write]);

        ring.write_pos = (start + to_write) % capacity;
        ring.len += to_write;
        to_write
    }

    /// Remove exactly `count` bytes, or nothing if fewer are buffered
    pub fn read_exact(&self, count: usize) -> Option<Vec<u8>> {
        let mut ring = self.ring.lock();
        if count == 0 || ring.len < count {
            return None;
        }

        let capacity = ring.buffer.len();
        let start = (ring.write_pos + capacity - ring.len) % capacity;
        let first = count.min(capacity - start);

        let mut out = Vec::with_capacity(count);
        out.extend_from_slice(&ring.buffer[start..start + first]);
        out.extend_from_slice(&ring.buffer[..count - first]);

        ring.len -= count;
        Some(out)
    }

    /// Get the number of bytes currently buffered
    pub fn available(&self) -> usize {
        self.ring.lock().len
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().buffer.len()
    }

    /// Discard everything buffered
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.len = 0;
        ring.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_write_read() {
        let buf = AudioStagingBuffer::new(64);

        assert_eq!(buf.write(&[1, 2, 3, 4, 5, 6, 7, 8]), 8);
        assert_eq!(buf.available(), 8);
        assert_eq!(buf.read_exact(4), Some(vec![1, 2, 3, 4]));
        assert_eq!(buf.read_exact(4), Some(vec![5, 6, 7, 8]));
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn test_short_read_takes_nothing() {
        let buf = AudioStagingBuffer::new(64);
        buf.write(&[9; 8]);

        assert_eq!(buf.read_exact(12), None);
        assert_eq!(buf.available(), 8);
    }

    #[test]
    fn test_overflow_drops_excess() {
        let buf = AudioStagingBuffer::new(16);

        assert_eq!(buf.write(&[1; 12]), 12);
        // 4 bytes free: the rest is dropped, the unread data is untouched
        assert_eq!(buf.write(&[2; 12]), 4);
        assert_eq!(buf.write(&[3; 4]), 0);

        let mut expected = vec![1; 12];
        expected.extend_from_slice(&[2; 4]);
        assert_eq!(buf.read_exact(16), Some(expected));
    }

    #[test]
    fn test_writes_keep_frame_alignment() {
        let buf = AudioStagingBuffer::new(18);
        assert_eq!(buf.capacity(), 16);

        assert_eq!(buf.write(&[0; 7]), 4);
        assert_eq!(buf.available(), 4);
    }

    #[test]
    fn test_wrap_around() {
        let buf = AudioStagingBuffer::new(16);

        buf.write(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(buf.read_exact(8), Some(vec![1, 1, 1, 1, 2, 2, 2, 2]));

        // wraps past the end of the backing storage
        assert_eq!(buf.write(&[4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6]), 12);
        assert_eq!(
            buf.read_exact(16),
            Some(vec![3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6])
        );
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let buf = Arc::new(AudioStagingBuffer::new(4800));
        let writer_buf = buf.clone();

        let writer = thread::spawn(move || {
            let mut written = 0;
            for i in 0..200u32 {
                let chunk: Vec<u8> = (0..480).map(|b| ((i + b) % 251) as u8).collect();
                written += writer_buf.write(&chunk);
                thread::sleep(Duration::from_micros(100));
            }
            written
        });

        let mut read = 0;
        for _ in 0..400 {
            if let Some(chunk) = buf.read_exact(480) {
                read += chunk.len();
            }
            thread::sleep(Duration::from_micros(50));
        }

        let written = writer.join().unwrap();
        read += buf.available();
        assert_eq!(read, written);
    }
}
