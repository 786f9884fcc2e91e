use crate::error::BrokenStream;

/// Default starting capacity for a stream mirror.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4096;

/// Append-only byte accumulator addressed by stream offset.
///
/// Chunks must chain exactly: each `append` has to start where the previous
/// one ended. A chunk that does not marks the buffer broken, and a broken
/// buffer ignores everything until `reset`.
#[derive(Debug)]
pub struct GrowableByteBuffer {
    initial_capacity: usize,
    capacity: usize,
    bytes: Vec<u8>,
    version: u64,
    broken: bool,
}

impl GrowableByteBuffer {
    pub fn new(initial_capacity: usize) -> Self {
        let initial_capacity = initial_capacity.max(1);
        Self {
            initial_capacity,
            capacity: initial_capacity,
            bytes: Vec::with_capacity(initial_capacity),
            version: 0,
            broken: false,
        }
    }

    /// Append `data`, which must begin at exactly `offset == len()`.
    pub fn append(&mut self, offset: u64, data: &[u8]) -> Result<(), BrokenStream> {
        let expected = self.len() as u64;
        if self.broken {
            return Err(BrokenStream { expected, got: offset });
        }
        if offset != expected {
            log::warn!("stream buffer broken: expected offset {}, got {}", expected, offset);
            self.broken = true;
            return Err(BrokenStream { expected, got: offset });
        }
        if data.is_empty() {
            return Ok(());
        }

        let needed = self.bytes.len() + data.len();
        if needed > self.capacity {
            self.grow(needed);
        }
        self.bytes.extend_from_slice(data);
        self.version += 1;
        Ok(())
    }

    fn grow(&mut self, needed: usize) {
        let scaled = self.capacity + self.capacity / 2;
        let new_capacity = scaled.max(needed);
        let mut next = Vec::with_capacity(new_capacity);
        next.extend_from_slice(&self.bytes);
        self.bytes = next;
        self.capacity = new_capacity;
    }

    /// The bytes written so far, `[0, len)`.
    pub fn snapshot(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop all content and the broken flag, returning to the initial capacity.
    /// The version counter keeps counting so observers notice the reset.
    pub fn reset(&mut self) {
        self.bytes = Vec::with_capacity(self.initial_capacity);
        self.capacity = self.initial_capacity;
        self.broken = false;
        self.version += 1;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Default for GrowableByteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY)
    }
}
