//! Register elements
//!
//! An [`Element`] is one contiguous register range inside a task. Decoding the raw
//! words into typed values is left to the owning driver, which observes updates
//! through the optional callback.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

/// Called with `Some(words)` after a successful read and `None` when the value became stale
pub type UpdateCallback = Arc<dyn Fn(Option<&[u16]>) + Send + Sync>;

/// One contiguous register range owned by exactly one task
pub struct Element {
    address: u16,
    length: u16,
    value: Mutex<Option<Vec<u16>>>,
    next_write: Mutex<Option<Vec<u16>>>,
    on_update: Option<UpdateCallback>,
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("address", &self.address)
            .field("length", &self.length)
            .field("value", &*self.value.lock())
            .field("has_pending_write", &self.has_pending_write())
            .finish()
    }
}

impl Element {
    /// Create an element covering `length` words starting at `address`
    pub fn new(address: u16, length: u16) -> Self {
        Self {
            address,
            length,
            value: Mutex::new(None),
            next_write: Mutex::new(None),
            on_update: None,
        }
    }

    /// Single-word element (one register or one coil)
    pub fn single(address: u16) -> Self {
        Self::new(address, 1)
    }

    pub fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// First address after this element
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.length)
    }

    /// Last successfully read words, `None` if never read or invalidated
    pub fn value(&self) -> Option<Vec<u16>> {
        self.value.lock().clone()
    }

    /// Queue words to be written by the next write task execution
    pub fn set_next_write(&self, words: Vec<u16>) -> Result<()> {
        if words.len() != usize::from(self.length) {
            return Err(BridgeError::task(format!(
                "element at {} expects {} words, got {}",
                self.address,
                self.length,
                words.len()
            )));
        }
        *self.next_write.lock() = Some(words);
        Ok(())
    }

    pub fn has_pending_write(&self) -> bool {
        self.next_write.lock().is_some()
    }

    pub(crate) fn take_next_write(&self) -> Option<Vec<u16>> {
        self.next_write.lock().take()
    }

    pub(crate) fn update(&self, words: &[u16]) {
        *self.value.lock() = Some(words.to_vec());
        if let Some(callback) = &self.on_update {
            callback(Some(words));
        }
    }

    /// Mark the value stale after a transport failure
    pub(crate) fn invalidate(&self) {
        let was_valid = self.value.lock().take().is_some();
        if was_valid {
            if let Some(callback) = &self.on_update {
                callback(None);
            }
        }
    }
}
