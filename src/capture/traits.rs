//! Contracts between capture producers and the recording pipeline

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::frame::{PixelFormat, SampleFormat};

/// A frame notification from a video producer
///
/// `data` is only valid for the duration of the callback; consumers copy out of it.
/// For NV12 the UV plane follows the Y plane at `stride * height`, with the same stride.
#[derive(Debug, Clone, Copy)]
pub struct VideoPacket<'a> {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub stride: usize,
    pub data: &'a [u8],
}

/// A packet notification from an audio producer
///
/// `data` holds `samples * channels` interleaved samples in `sample_format`.
#[derive(Debug, Clone, Copy)]
pub struct AudioPacket<'a> {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub samples: usize,
    pub data: &'a [u8],
}

pub type VideoCallback = dyn Fn(&VideoPacket<'_>) + Send + Sync;
pub type AudioCallback = dyn Fn(&AudioPacket<'_>) + Send + Sync;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A producer of raw video frames
pub trait VideoSource: Send + Sync {
    fn subscribe(&self, callback: Arc<VideoCallback>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// A producer of raw audio packets
pub trait AudioSource: Send + Sync {
    fn subscribe(&self, callback: Arc<AudioCallback>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Callback registry for source implementations
///
/// `snapshot` copies the current subscribers out of the lock so callbacks never run
/// under it. A callback may therefore still fire once after `unsubscribe` returns;
/// subscribers must tolerate that.
pub struct Subscribers<C: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Arc<C>)>>,
}

impl<C: ?Sized> Subscribers<C> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, callback: Arc<C>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.entries.lock().retain(|(entry, _)| *entry != id);
    }

    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ?Sized> Default for Subscribers<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscribers<VideoCallback> {
    pub fn emit(&self, packet: &VideoPacket<'_>) {
        for callback in self.snapshot() {
            callback(packet);
        }
    }
}

impl Subscribers<AudioCallback> {
    pub fn emit(&self, packet: &AudioPacket<'_>) {
        for callback in self.snapshot() {
            callback(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let subscribers: Subscribers<VideoCallback> = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = subscribers.subscribe(Arc::new(move |_: &VideoPacket<'_>| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        let pixels = [0u8; 12];
        let packet = VideoPacket {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
            stride: 6,
            data: &pixels,
        };

        subscribers.emit(&packet);
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        subscribers.unsubscribe(id);
        assert!(subscribers.is_empty());
        subscribers.emit(&packet);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let subscribers: Arc<Subscribers<AudioCallback>> = Arc::new(Subscribers::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let registry = subscribers.clone();
        let own_id = slot.clone();
        let id = subscribers.subscribe(Arc::new(move |_: &AudioPacket<'_>| {
            if let Some(id) = *own_id.lock() {
                registry.unsubscribe(id);
            }
        }));
        *slot.lock() = Some(id);

        let samples = [0u8; 4];
        subscribers.emit(&AudioPacket {
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::S16,
            samples: 1,
            data: &samples,
        });
        assert!(subscribers.is_empty());
    }
}
