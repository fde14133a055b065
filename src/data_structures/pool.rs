//! Per-frame pool of scratch matrices for draw data.

use std::{cell::RefCell, rc::Rc};

/// Default number of matrices available per frame before the pool grows.
pub const DEFAULT_CAPACITY: usize = 256;

/// A 16-float scratch buffer handed out by [`MatrixPool`].
///
/// Cloning shares the same storage. The contents are only valid until the
/// pool is reset.
#[derive(Clone, Debug)]
pub struct PooledMatrix(Rc<RefCell<[f32; 16]>>);

impl PooledMatrix {
    pub fn get(&self) -> [f32; 16] {
        *self.0.borrow()
    }

    pub fn set(&self, values: [f32; 16]) {
        *self.0.borrow_mut() = values;
    }
}

impl PartialEq for PooledMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// Frame pool of matrix buffers.
///
/// Buffers are allocated up front and handed out in order by [`acquire`]. The
/// caller resets the pool once per frame, after which every buffer is reused.
///
/// [`acquire`]: MatrixPool::acquire
#[derive(Debug)]
pub struct MatrixPool {
    buffers: Vec<PooledMatrix>,
    offset: usize,
}

impl MatrixPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: (0..capacity).map(|_| Self::allocate()).collect(),
            offset: 0,
        }
    }

    fn allocate() -> PooledMatrix {
        PooledMatrix(Rc::new(RefCell::new([0.0; 16])))
    }

    /// Hands out the next free buffer. The pool doubles when it runs dry.
    pub fn acquire(&mut self) -> PooledMatrix {
        if self.offset >= self.buffers.len() {
            let additional = self.buffers.len().max(1);
            log::debug!(
                "matrix pool exhausted at {} buffers, growing by {additional}",
                self.buffers.len()
            );
            self.buffers.extend((0..additional).map(|_| Self::allocate()));
        }
        let buffer = self.buffers[self.offset].clone();
        self.offset += 1;
        buffer
    }

    /// Number of buffers handed out since the last reset.
    pub fn in_use(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

impl Default for MatrixPool {
    fn default() -> Self {
        Self::new()
    }
}
