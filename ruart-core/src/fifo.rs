use crate::constants::FIFO_DEPTH;

/// Fixed-capacity byte queue for one transfer direction.
/// Refuses bytes past capacity instead of growing; the caller decides
/// whether that is an overrun or a flush point.
pub struct Fifo {
    bytes: heapless::Deque<u8, FIFO_DEPTH>,
}

impl Fifo {
    pub fn new() -> Self {
        Fifo {
            bytes: heapless::Deque::new(),
        }
    }

    /// Enqueues one byte; returns it back when the FIFO is full.
    pub fn push(&mut self, value: u8) -> Result<(), u8> {
        self.bytes.push_back(value)
    }

    /// Dequeues the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() == FIFO_DEPTH
    }

    /// Remaining space before the next push is refused.
    pub fn free(&self) -> usize {
        FIFO_DEPTH - self.bytes.len()
    }

    pub fn clear(&mut self) {
        while self.bytes.pop_front().is_some() {}
    }

    /// Moves queued bytes into `out` in arrival order, emptying the
    /// FIFO. Returns the number of bytes written.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut count = 0;
        while count < out.len() {
            match self.bytes.pop_front() {
                Some(byte) => {
                    out[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Fifo::new()
    }
}
