//! Bounded packet queue between the feed and the encoder drain task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::super::types::VideoPacket;

/// Bounded FIFO of packets waiting to be written to the encoder.
///
/// Shared by one producer (the feed's byte supply) and one consumer (the
/// drain task). When full, new packets are refused and the queued ones are
/// kept.
pub struct RecordingBuffer {
    queue: Mutex<VecDeque<VideoPacket>>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl RecordingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<VideoPacket>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `packet` unless the buffer is full. Returns false when refused.
    pub fn try_enqueue(&self, packet: VideoPacket) -> bool {
        let mut queue = self.lock();
        if queue.len() < self.capacity {
            queue.push_back(packet);
            drop(queue);
            self.accepted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            drop(queue);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Removes the oldest packet, if any.
    pub fn dequeue(&self) -> Option<VideoPacket> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Switch the feed consults for every packet: when a buffer is attached the
/// packet is offered to it, otherwise recording is idle and nothing happens.
///
/// Only the coordinator attaches and detaches; the feed only reads.
#[derive(Clone, Default)]
pub struct RecordingTap {
    target: Arc<RwLock<Option<Arc<RecordingBuffer>>>>,
}

impl RecordingTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, buffer: Arc<RecordingBuffer>) {
        *self.target.write().unwrap_or_else(|e| e.into_inner()) = Some(buffer);
    }

    pub fn detach(&self) -> Option<Arc<RecordingBuffer>> {
        self.target.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_attached(&self) -> bool {
        self.target
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Copies `packet` into the attached buffer. Returns true if it was queued.
    pub fn offer(&self, packet: &VideoPacket) -> bool {
        let target = self.target.read().unwrap_or_else(|e| e.into_inner());
        let Some(buffer) = target.as_ref() else {
            return false;
        };

        if buffer.try_enqueue(packet.clone()) {
            true
        } else {
            tracing::warn!(target: "video", "[RECORDER] recording buffer full, packet dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u8) -> VideoPacket {
        VideoPacket::from(vec![n; 4])
    }

    #[test]
    fn test_dequeue_preserves_enqueue_order() {
        let buffer = RecordingBuffer::with_capacity(100);
        for n in 0..50 {
            assert!(buffer.try_enqueue(packet(n)));
        }

        let drained: Vec<u8> = std::iter::from_fn(|| buffer.dequeue())
            .map(|p| p.as_bytes()[0])
            .collect();

        assert_eq!(drained, (0..50).collect::<Vec<u8>>());
        assert!(buffer.dequeue().is_none());
    }

    #[test]
    fn test_overflow_keeps_first_packets() {
        let buffer = RecordingBuffer::with_capacity(5);
        let results: Vec<bool> = (0..7).map(|n| buffer.try_enqueue(packet(n))).collect();

        assert_eq!(results, vec![true, true, true, true, true, false, false]);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.accepted(), 5);
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.dequeue().map(|p| p.as_bytes()[0]), Some(0));
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let buffer = RecordingBuffer::with_capacity(3);
        for n in 0..20 {
            buffer.try_enqueue(packet(n));
            assert!(buffer.len() <= buffer.capacity());
        }
    }

    #[test]
    fn test_space_frees_after_dequeue() {
        let buffer = RecordingBuffer::with_capacity(2);
        assert!(buffer.try_enqueue(packet(1)));
        assert!(buffer.try_enqueue(packet(2)));
        assert!(!buffer.try_enqueue(packet(3)));

        buffer.dequeue();
        assert!(buffer.try_enqueue(packet(4)));

        let order: Vec<u8> = std::iter::from_fn(|| buffer.dequeue())
            .map(|p| p.as_bytes()[0])
            .collect();
        assert_eq!(order, vec![2, 4]);
    }

    #[test]
    fn test_concurrent_producer_consumer_keeps_order() {
        let buffer = Arc::new(RecordingBuffer::with_capacity(10_000));
        let producer_buffer = buffer.clone();

        let producer = std::thread::spawn(move || {
            for n in 0..2000u32 {
                producer_buffer.try_enqueue(VideoPacket::from(n.to_be_bytes().to_vec()));
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 2000 {
            match buffer.dequeue() {
                Some(p) => {
                    let bytes: [u8; 4] = p.as_bytes().try_into().unwrap();
                    seen.push(u32::from_be_bytes(bytes));
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..2000).collect::<Vec<u32>>());
    }

    #[test]
    fn test_tap_ignores_packets_when_detached() {
        let tap = RecordingTap::new();
        assert!(!tap.offer(&packet(1)));

        let buffer = Arc::new(RecordingBuffer::with_capacity(1));
        tap.attach(buffer.clone());
        assert!(tap.offer(&packet(2)));
        assert!(!tap.offer(&packet(3)));
        assert_eq!(buffer.dropped(), 1);

        let detached = tap.detach().unwrap();
        assert!(Arc::ptr_eq(&detached, &buffer));
        assert!(!tap.offer(&packet(4)));
        assert_eq!(buffer.len(), 1);
    }
}
