use std::sync::{Arc, Mutex, MutexGuard};
use crate::ring_buffer::RingBuffer;
use super::Message;

/// A named, bounded, lossy queue of messages.
///
/// `try_receive` drains in FIFO order for a single consumer. `peek_latest`
/// returns the most recent message regardless of consumption, which makes a
/// topic usable as an atomically-replaced snapshot of shared state.
pub struct Topic<T: Message> {
    name: String,
    buffer: Arc<Mutex<RingBuffer<T>>>,
}

impl<T: Message> Topic<T> {
    pub fn new(name: &str, capacity: usize) -> Self {
        Topic {
            name: name.to_string(),
            buffer: Arc::new(Mutex::new(RingBuffer::new(capacity))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, RingBuffer<T>> {
        //a panicking publisher cannot leave the ring half-written
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, msg: T) -> u64 {
        self.lock().push(msg)
    }

    pub fn try_receive(&self) -> Option<T> {
        self.lock().pop()
    }

    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.lock();
        let mut out = Vec::with_capacity(ring.len());
        while let Some(msg) = ring.pop() {
            out.push(msg);
        }
        out
    }

    pub fn peek_latest(&self) -> Option<(T, u64)> {
        self.lock().peek_latest()
    }

    pub fn latest_epoch(&self) -> u64 {
        self.lock().latest_epoch()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

impl<T: Message> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Topic {
            name: self.name.clone(),
            buffer: Arc::clone(&self.buffer),
        }
    }
}
