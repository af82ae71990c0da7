//! Lock-free frequency control shared between the control thread and the
//! streaming loop.
//!
//! Writers publish with `Release`, the streaming loop reads with `Acquire` once
//! per period. A change therefore takes effect at the next period boundary,
//! never in the middle of one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam::utils::CachePadded;

pub const MIN_FREQUENCY_HZ: u32 = 0;
pub const MAX_FREQUENCY_HZ: u32 = 5000;

/// Clamp a requested frequency into `[MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ]`.
#[inline]
pub fn clamp_frequency(hz: i32) -> u32 {
    hz.clamp(MIN_FREQUENCY_HZ as i32, MAX_FREQUENCY_HZ as i32) as u32
}

#[derive(Debug)]
pub struct FrequencyCell {
    hz: CachePadded<AtomicU32>,
}

impl FrequencyCell {
    pub fn new(hz: i32) -> Self {
        Self {
            hz: CachePadded::new(AtomicU32::new(clamp_frequency(hz))),
        }
    }

    /// Store a new frequency, returning the clamped value actually stored.
    #[inline]
    pub fn set(&self, hz: i32) -> u32 {
        let clamped = clamp_frequency(hz);
        self.hz.store(clamped, Ordering::Release);
        clamped
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.hz.load(Ordering::Acquire)
    }
}

/// Cloneable handle for changing the pitch from any thread.
#[derive(Debug, Clone)]
pub struct FrequencyHandle {
    cell: Arc<FrequencyCell>,
}

impl FrequencyHandle {
    pub fn new(hz: i32) -> Self {
        Self {
            cell: Arc::new(FrequencyCell::new(hz)),
        }
    }

    pub fn set_frequency(&self, hz: i32) -> u32 {
        self.cell.set(hz)
    }

    pub fn frequency(&self) -> u32 {
        self.cell.get()
    }

    pub(crate) fn cell(&self) -> Arc<FrequencyCell> {
        Arc::clone(&self.cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clamps_out_of_range() {
        let cell = FrequencyCell::new(440);
        assert_eq!(cell.get(), 440);
        assert_eq!(cell.set(-10), 0);
        assert_eq!(cell.get(), 0);
        assert_eq!(cell.set(9000), 5000);
        assert_eq!(cell.get(), 5000);
        assert_eq!(FrequencyCell::new(i32::MIN).get(), 0);
    }

    #[test]
    fn test_handle_clones_share_state() {
        let handle = FrequencyHandle::new(220);
        let other = handle.clone();
        other.set_frequency(880);
        assert_eq!(handle.frequency(), 880);
    }

    #[test]
    fn test_concurrent_writers_leave_a_written_value() {
        let handle = FrequencyHandle::new(0);
        let writers: Vec<_> = [100, 200, 300, 400]
            .into_iter()
            .map(|hz| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        handle.set_frequency(hz);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert!([100, 200, 300, 400].contains(&handle.frequency()));
    }
}
