//! Single-slot latest-value buffer.

/// Holds only the newest pushed value; older ones are dropped.
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Option<T>,
    dropped: u64,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self { value: None, dropped: 0 }
    }
}

impl<T> LatestSlot<T> {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any unread one.
    pub fn push(&mut self, value: T) {
        if self.value.replace(value).is_some() {
            self.dropped += 1;
        }
    }

    /// Take the newest value.
    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    /// Whether a value is waiting.
    pub fn is_full(&self) -> bool {
        self.value.is_some()
    }

    /// Values overwritten before being read.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
