//! Connection buffer pool.
//!
//! Every connection owns two fixed-size buffers (read and write). Buffers
//! are handed out on accept and returned on close so that connection churn
//! does not hit the allocator on every accept.

/// Recycling pool of fixed-size buffers.
///
/// Buffers are allocated lazily and kept on a free list (LIFO for cache
/// locality) when returned. At most `max_idle` buffers are retained; extra
/// returned buffers are dropped.
pub struct BufferPool {
    /// Stack of idle buffers.
    free_list: Vec<Box<[u8]>>,
    /// Size of each buffer.
    buffer_size: usize,
    /// Upper bound on idle buffers kept around.
    max_idle: usize,
}

impl BufferPool {
    /// Create an empty pool.
    ///
    /// # Arguments
    /// * `buffer_size` - Size of each buffer in bytes
    /// * `max_idle` - Maximum number of idle buffers to retain
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            free_list: Vec::new(),
            buffer_size,
            max_idle,
        }
    }

    /// Take a buffer from the pool, allocating if none are idle.
    pub fn alloc(&mut self) -> Box<[u8]> {
        self.free_list
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice())
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers of the wrong size are dropped rather than recycled.
    pub fn free(&mut self, buf: Box<[u8]>) {
        if buf.len() == self.buffer_size && self.free_list.len() < self.max_idle {
            self.free_list.push(buf);
        }
    }

    /// Get the number of idle buffers.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let mut pool = BufferPool::new(1024, 4);

        assert_eq!(pool.available(), 0);

        // Allocates lazily
        let mut b0 = pool.alloc();
        assert_eq!(b0.len(), 1024);
        b0[0] = 42;

        pool.free(b0);
        assert_eq!(pool.available(), 1);

        // Reuses the returned buffer
        let b1 = pool.alloc();
        assert_eq!(b1[0], 42);
        assert_eq!(pool.available(), 0);
        pool.free(b1);
    }

    #[test]
    fn test_buffer_pool_max_idle() {
        let mut pool = BufferPool::new(16, 2);

        let bufs: Vec<_> = (0..4).map(|_| pool.alloc()).collect();
        for buf in bufs {
            pool.free(buf);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_pool_rejects_foreign_size() {
        let mut pool = BufferPool::new(16, 2);

        pool.free(vec![0u8; 8].into_boxed_slice());
        assert_eq!(pool.available(), 0);
    }
}
