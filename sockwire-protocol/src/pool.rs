//! Reusable message buffer pool.
//!
//! Read loops acquire one buffer per inbound frame; dropping the buffer
//! returns it to the pool. Buffers that grew past the pooled capacity are
//! discarded instead of retained.

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default pre-allocated capacity of pooled buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Default maximum number of idle buffers retained by the pool.
pub const DEFAULT_MAX_IDLE: usize = 64;

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_idle: usize,
}

/// A thread-safe free list of message buffers.
#[derive(Clone)]
pub struct MessagePool {
    inner: Arc<PoolInner>,
}

impl MessagePool {
    pub fn new(buffer_capacity: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                buffer_capacity,
                max_idle,
            }),
        }
    }

    /// Acquires a cleared buffer from the pool, allocating when empty.
    pub fn get(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .lock()
            .expect("pool lock poisoned")
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers currently held by the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.free.lock().expect("pool lock poisoned").len()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE)
    }
}

/// A buffer on loan from a [`MessagePool`].
///
/// Dropping the buffer releases it back to the pool; [`PooledBuffer::release`]
/// does the same explicitly. Either way the release happens exactly once per
/// acquisition.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Returns the buffer to its pool.
    pub fn release(self) {
        // Drop does the work.
    }

    /// Takes the buffer out, detaching it from the pool.
    ///
    /// The memory is handed to the caller and will not be recycled.
    pub fn into_inner(mut self) -> BytesMut {
        self.buf.take().expect("buffer already taken")
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer already taken")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer already taken")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(mut buf) = self.buf.take() else {
            return;
        };
        // Over-capacity buffers are cheaper to discard than to retain.
        if buf.capacity() > self.pool.buffer_capacity * 2 {
            return;
        }
        let mut free = self.pool.free.lock().expect("pool lock poisoned");
        if free.len() < self.pool.max_idle {
            buf.clear();
            free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_get_allocates_with_capacity() {
        let pool = MessagePool::new(1024, 4);
        let buf = pool.get();
        assert!(buf.capacity() >= 1024);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = MessagePool::new(1024, 4);
        assert_eq!(pool.idle_count(), 0);
        drop(pool.get());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_recycled_buffer_is_cleared() {
        let pool = MessagePool::new(1024, 4);
        {
            let mut buf = pool.get();
            buf.put_slice(b"leftover");
        }
        let buf = pool.get();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_release_is_explicit_drop() {
        let pool = MessagePool::new(1024, 4);
        pool.get().release();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_over_capacity_buffer_discarded() {
        let pool = MessagePool::new(64, 4);
        {
            let mut buf = pool.get();
            buf.put_slice(&vec![0u8; 4096]);
        }
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_max_idle_bound() {
        let pool = MessagePool::new(64, 2);
        let a = pool.get();
        let b = pool.get();
        let c = pool.get();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_into_inner_detaches() {
        let pool = MessagePool::new(64, 4);
        let buf = pool.get().into_inner();
        drop(buf);
        assert_eq!(pool.idle_count(), 0);
    }
}
