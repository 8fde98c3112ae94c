/// Fixed-capacity circular byte buffer behind the loopback render tap and
/// capture source.
///
/// Wrap in `Arc<parking_lot::Mutex<ByteRing>>` for cross-thread access.
///
/// Overflow behavior: drops the oldest bytes.
#[derive(Debug)]
pub struct ByteRing {
    buffer: Vec<u8>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
    dropped: u64,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
            dropped: 0,
        }
    }

    /// Append `data`, dropping the oldest bytes on overflow.
    ///
    /// If `data` is larger than capacity, only its last `capacity` bytes are kept.
    pub fn push(&mut self, data: &[u8]) {
        if data.is_empty() || self.capacity == 0 {
            return;
        }

        let data = if data.len() > self.capacity {
            self.dropped += (data.len() - self.capacity) as u64;
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let overflow = (self.available + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
            self.dropped += overflow as u64;
        }

        // At most two contiguous copies
        let first = data.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&data[..first]);
        self.buffer[..data.len() - first].copy_from_slice(&data[first..]);
        self.write_index = (self.write_index + data.len()) % self.capacity;
        self.available += data.len();
    }

    /// Move up to `out.len()` bytes into `out`, returning how many were copied.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let to_read = out.len().min(self.available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out[first..to_read].copy_from_slice(&self.buffer[..to_read - first]);
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        to_read
    }

    /// Drain everything currently buffered.
    pub fn take_all(&mut self) -> Vec<u8> {
        let mut out = vec![0; self.available];
        self.pop_into(&mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Bytes lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
