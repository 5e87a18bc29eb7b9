//! A small pool of reusable byte buffers, handed out as guards that return
//! themselves to the pool on drop.
//!
//! The datagram channel crate treats this as its byte-buffer subsystem:
//! pooled buffers are filled by the kernel (`recvmsg`/`recvmmsg`) and then
//! either delivered whole or retain-sliced into several inbound packets
//! (GRO fan-out, scattering reads) without copying. `Buffer<bytes::BytesMut>`
//! supports exactly that via `freeze`, which hands out `bytes::Bytes` —
//! itself reference-counted and cheaply sliceable.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use opentelemetry::metrics::Gauge;

/// A type whose buffers can be recycled in place instead of reallocated.
pub trait Resettable {
    fn reset(&mut self, capacity: usize);
}

impl Resettable for Vec<u8> {
    fn reset(&mut self, capacity: usize) {
        self.clear();
        self.resize(capacity, 0);
    }
}

impl Resettable for BytesMut {
    fn reset(&mut self, capacity: usize) {
        self.clear();
        if self.capacity() < capacity {
            self.reserve(capacity - self.capacity());
        }
        self.resize(capacity, 0);
    }
}

/// A bounded pool of `T` buffers.
///
/// `pull` never blocks: an empty pool just allocates a fresh `T` via
/// `Default`. The pool is a cache, not a backpressure mechanism — the
/// backpressure for this crate lives in the outbound queue, not here.
pub struct BufferPool<T> {
    free: Arc<ArrayQueue<T>>,
    default_capacity: usize,
    pool_size: Gauge<u64>,
}

impl<T: Resettable + Default> BufferPool<T> {
    pub fn new(slots: usize, default_capacity: usize) -> Self {
        let meter = opentelemetry::global::meter("bufferpool");
        Self {
            free: Arc::new(ArrayQueue::new(slots.max(1))),
            default_capacity,
            pool_size: meter.u64_gauge("bufferpool_free_slots").build(),
        }
    }

    pub fn pull(&self) -> Buffer<T> {
        self.pull_with_capacity(self.default_capacity)
    }

    pub fn pull_with_capacity(&self, capacity: usize) -> Buffer<T> {
        let reused = !self.free.is_empty();
        let mut inner = self.free.pop().unwrap_or_default();
        inner.reset(capacity);
        let free_slots = self.free.len() as u64;
        self.pool_size.record(free_slots, &[]);
        tracing::trace!(target: "bufferpool", capacity, reused, free_slots, "pulled buffer");
        Buffer {
            inner: Some(inner),
            free: self.free.clone(),
        }
    }
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            free: self.free.clone(),
            default_capacity: self.default_capacity,
            pool_size: self.pool_size.clone(),
        }
    }
}

/// A checked-out buffer. Returns itself to the pool's free list on drop,
/// unless it was consumed first (e.g. via `freeze`).
pub struct Buffer<T> {
    inner: Option<T>,
    free: Arc<ArrayQueue<T>>,
}

impl<T> Deref for Buffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("buffer already taken")
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("buffer already taken")
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if self.free.push(inner).is_err() {
                tracing::trace!(target: "bufferpool", "pool full, dropping buffer instead of returning it");
            }
        }
    }
}

impl Buffer<BytesMut> {
    /// Converts the checked-out buffer into a reference-counted, cheaply
    /// sliceable `Bytes`. This is the "retained slice" primitive the read
    /// path uses for GRO fan-out and scattering reads: every slice shares
    /// the same underlying allocation, none of them copy.
    ///
    /// The buffer does not return to the pool after this call.
    pub fn freeze(mut self) -> bytes::Bytes {
        self.inner.take().unwrap_or_default().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulled_buffer_has_requested_capacity() {
        let pool: BufferPool<BytesMut> = BufferPool::new(4, 1024);
        let buf = pool.pull();
        assert_eq!(buf.len(), 1024);
    }

    #[test]
    fn dropped_buffer_is_reused_instead_of_reallocated() {
        let pool: BufferPool<Vec<u8>> = BufferPool::new(1, 64);
        {
            let mut buf = pool.pull();
            buf[0] = 0xAB;
        }
        let buf = pool.pull();
        assert_eq!(buf[0], 0xAB, "pool should hand back the recycled allocation");
    }

    #[test]
    fn frozen_slices_share_storage_without_copy() {
        let pool: BufferPool<BytesMut> = BufferPool::new(1, 16);
        let mut buf = pool.pull();
        buf[0..4].copy_from_slice(&[1, 2, 3, 4]);
        let frozen = buf.freeze();
        let first_half = frozen.slice(0..2);
        let second_half = frozen.slice(2..4);
        assert_eq!(&first_half[..], &[1, 2]);
        assert_eq!(&second_half[..], &[3, 4]);
    }
}
