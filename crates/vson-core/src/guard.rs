//! In-flight guard for active polls.
//!
//! Only one command session may run against a device at a time. A
//! [`PollGuard`] marks a device as busy and clears the mark when dropped, so
//! the flag is released on every exit path of a poll, including panics and
//! cancelled futures.

use std::sync::atomic::{AtomicBool, Ordering};

/// Marks a device as being polled for as long as the guard lives.
#[derive(Debug)]
pub struct PollGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PollGuard<'a> {
    /// Try to mark the device as busy.
    ///
    /// Returns `None` when another poll already holds the flag.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
