//! Non-blocking single-flight flag.
//!
//! A second caller is turned away instead of waiting. The flag is cleared when the
//! guard drops, including when the owning future is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct SingleFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SingleFlightGuard<'a> {
    /// `None` when another holder is active
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
