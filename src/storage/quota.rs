//! Admission control over the number of live pastes and their total size.

use super::{QuotaLimit, StorageError, StorageResult};
use crate::units::format_bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// Configured ceilings. Zero means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub max_count: usize,
    pub max_bytes: u64,
}

/// Snapshot of current usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaReport {
    pub count: usize,
    pub bytes: u64,
}

/// Tracks usage against [`QuotaLimits`].
///
/// Every successful [`reserve`](Self::reserve) must be matched by exactly one
/// [`release`](Self::release) of the same size, either when the paste is
/// deleted or when the write it was reserved for fails.
#[derive(Debug)]
pub struct QuotaTracker {
    limits: QuotaLimits,
    usage: Mutex<QuotaReport>,
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            usage: Mutex::new(QuotaReport::default()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Claim room for one more paste of `size` bytes.
    pub fn reserve(&self, size: u64) -> StorageResult<()> {
        let mut usage = self.usage.lock();
        if self.limits.max_count > 0 && usage.count >= self.limits.max_count {
            return Err(StorageError::QuotaExceeded(QuotaLimit::Count));
        }
        if self.limits.max_bytes > 0 {
            let fits = usage
                .bytes
                .checked_add(size)
                .is_some_and(|total| total <= self.limits.max_bytes);
            if !fits {
                return Err(StorageError::QuotaExceeded(QuotaLimit::Bytes));
            }
        }
        usage.count += 1;
        usage.bytes = usage.bytes.saturating_add(size);
        Ok(())
    }

    /// Return the room claimed for a paste of `size` bytes.
    pub fn release(&self, size: u64) {
        let mut usage = self.usage.lock();
        if usage.count == 0 || usage.bytes < size {
            warn!(
                count = usage.count,
                bytes = usage.bytes,
                size, "quota release without matching reservation"
            );
        }
        usage.count = usage.count.saturating_sub(1);
        usage.bytes = usage.bytes.saturating_sub(size);
    }

    pub fn report(&self) -> QuotaReport {
        *self.usage.lock()
    }

    /// True when not even a one-byte paste would be admitted.
    pub fn is_full(&self) -> bool {
        let usage = self.report();
        (self.limits.max_count > 0 && usage.count >= self.limits.max_count)
            || (self.limits.max_bytes > 0 && usage.bytes >= self.limits.max_bytes)
    }

    /// One-line usage summary for periodic logging.
    pub fn summary(&self) -> String {
        let usage = self.report();
        let count = if self.limits.max_count > 0 {
            format!(
                "{} ({:.2}% out of {})",
                usage.count,
                usage.count as f64 * 100.0 / self.limits.max_count as f64,
                self.limits.max_count
            )
        } else {
            usage.count.to_string()
        };
        let bytes = if self.limits.max_bytes > 0 {
            format!(
                "{} ({:.2}% out of {})",
                format_bytes(usage.bytes),
                usage.bytes as f64 * 100.0 / self.limits.max_bytes as f64,
                format_bytes(self.limits.max_bytes)
            )
        } else {
            format_bytes(usage.bytes)
        };
        format!("Have a total of {count} pastes using {bytes}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    #[test]
    fn unbounded_accepts_everything() {
        let quota = QuotaTracker::new(QuotaLimits::default());
        for _ in 0..100 {
            quota.reserve(1 << 20).unwrap();
        }
        assert_eq!(
            quota.report(),
            QuotaReport {
                count: 100,
                bytes: 100 << 20
            }
        );
        assert!(!quota.is_full());
    }

    #[test]
    fn count_ceiling() {
        let quota = QuotaTracker::new(QuotaLimits {
            max_count: 2,
            max_bytes: 0,
        });
        quota.reserve(10).unwrap();
        quota.reserve(10).unwrap();
        assert!(matches!(
            quota.reserve(1),
            Err(StorageError::QuotaExceeded(QuotaLimit::Count))
        ));
        assert!(quota.is_full());
        quota.release(10);
        quota.reserve(1).unwrap();
        assert_eq!(quota.report(), QuotaReport { count: 2, bytes: 11 });
    }

    #[test]
    fn byte_ceiling_is_inclusive() {
        let quota = QuotaTracker::new(QuotaLimits {
            max_count: 0,
            max_bytes: 100,
        });
        quota.reserve(60).unwrap();
        assert!(matches!(
            quota.reserve(41),
            Err(StorageError::QuotaExceeded(QuotaLimit::Bytes))
        ));
        quota.reserve(40).unwrap();
        assert!(quota.is_full());
        // A rejected reservation leaves usage untouched.
        assert_eq!(quota.report(), QuotaReport { count: 2, bytes: 100 });
    }

    #[test]
    fn release_never_underflows() {
        let quota = QuotaTracker::new(QuotaLimits::default());
        quota.release(5);
        assert_eq!(quota.report(), QuotaReport::default());
    }

    #[test]
    fn summary_mentions_limits() {
        let quota = QuotaTracker::new(QuotaLimits {
            max_count: 4,
            max_bytes: 1 << 20,
        });
        quota.reserve(1 << 10).unwrap();
        assert_eq!(
            quota.summary(),
            "Have a total of 1 (25.00% out of 4) pastes using 1.00KB (0.10% out of 1.00MB)"
        );
        let unbounded = QuotaTracker::new(QuotaLimits::default());
        assert_eq!(unbounded.summary(), "Have a total of 0 pastes using 0B");
    }

    #[test]
    fn concurrent_reservations_never_overcommit() {
        let limits = QuotaLimits {
            max_count: 16,
            max_bytes: 4096,
        };
        let quota = Arc::new(QuotaTracker::new(limits));
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let quota = quota.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let usage = quota.report();
                    assert!(usage.count <= limits.max_count);
                    assert!(usage.bytes <= limits.max_bytes);
                }
            })
        };

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let quota = quota.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    let mut held = Vec::new();
                    for _ in 0..2_000 {
                        if held.is_empty() || rng.random_bool(0.6) {
                            let size = rng.random_range(1..=512);
                            if quota.reserve(size).is_ok() {
                                held.push(size);
                            }
                        } else {
                            let idx = rng.random_range(0..held.len());
                            quota.release(held.swap_remove(idx));
                        }
                    }
                    for size in held {
                        quota.release(size);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
        observer.join().unwrap();
        assert_eq!(quota.report(), QuotaReport::default());
    }
}
