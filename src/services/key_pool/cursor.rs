//! Round-robin cursor
//!
//! The cursor itself is not synchronised; the pool keeps it behind its lock.

/// Position of the next slot to try
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    position: usize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self { position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Scan at most `len` slots circularly from the current position
    ///
    /// The first slot accepted by `is_available` is returned and the cursor
    /// moves just past it. If no slot is accepted the cursor stays put.
    pub fn next_available<F>(&mut self, len: usize, mut is_available: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        if len == 0 {
            return None;
        }
        for offset in 0..len {
            let idx = (self.position + offset) % len;
            if is_available(idx) {
                self.position = (idx + 1) % len;
                return Some(idx);
            }
        }
        None
    }
}
