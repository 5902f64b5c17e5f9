// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reusable response body buffers

use bytes::BytesMut;
use log::trace;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// A pool of body buffers shared by concurrent requests
///
/// A buffer is taken out of the pool for the duration of a request and returned when the request
/// is done with it, regardless of the outcome. Its contents never leak into another request.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max_buffers: usize,
    max_capacity: usize,
}

impl BufferPool {
    /// Default number of idle buffers kept
    pub const DEFAULT_MAX_BUFFERS: usize = 64;

    /// Default capacity limit for buffers returned to the pool, larger buffers are discarded
    pub const DEFAULT_MAX_CAPACITY: usize = 1024 * 1024;

    /// Creates a pool keeping at most `max_buffers` idle buffers with capacity up to
    /// `max_capacity` each.
    pub fn new(max_buffers: usize, max_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_buffers,
            max_capacity,
        }
    }

    /// Takes an empty buffer from the pool, allocating a new one if necessary.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let mut buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_default();
        buffer.clear();
        PooledBuffer { pool: self, buffer }
    }

    /// Number of idle buffers in the pool
    pub fn available(&self) -> usize {
        self.buffers.lock().map(|buffers| buffers.len()).unwrap_or(0)
    }

    fn release(&self, buffer: BytesMut) {
        if buffer.capacity() > self.max_capacity {
            trace!(
                "Discarding body buffer with capacity {}",
                buffer.capacity()
            );
            return;
        }

        if let Ok(mut buffers) = self.buffers.lock() {
            if buffers.len() < self.max_buffers {
                buffers.push(buffer);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BUFFERS, Self::DEFAULT_MAX_CAPACITY)
    }
}

/// A buffer borrowed from a [`BufferPool`], returned to the pool when dropped
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: BytesMut,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
