//! Two-sided admission control coupling insert and sample rates
//!
//! The limiter tracks how many items have been inserted, sampled and
//! deleted on a table and admits each side only while the *error*
//! `samples_per_insert * (inserts - deletes) - samples` stays inside the
//! configured window. Inserters block when samplers fall too far behind
//! and vice versa; every counter mutation wakes the opposite side.
//!
//! Waits never run while the table mutex is held: callers wait here first,
//! then take the table mutex and re-test the non-blocking probe before
//! committing.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a blocked wait re-checks its cancellation token.
const WAKEUP_PERIOD: Duration = Duration::from_millis(50);

/// Cooperative cancellation token for blocking waits
///
/// Cloning shares the flag. A fired token unblocks pending waits within one
/// wakeup period; `Table::close` additionally signals the condvars so its
/// own waiters return immediately.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Create an unfired token
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Counters {
    inserts: u64,
    samples: u64,
    deletes: u64,
    cancelled: bool,
}

/// Serializable limiter state, sufficient to resume the coupling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterCheckpoint {
    /// Target samples per insert
    pub samples_per_insert: f64,
    /// Minimum table size before sampling is admitted
    pub min_size_to_sample: u64,
    /// Lower bound of the admissible error window
    pub min_diff: f64,
    /// Upper bound of the admissible error window
    pub max_diff: f64,
    /// Total inserts recorded
    pub inserts: u64,
    /// Total samples recorded
    pub samples: u64,
    /// Total deletes recorded
    pub deletes: u64,
}

/// Snapshot of limiter configuration and counters for `Table::info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterInfo {
    /// Target samples per insert
    pub samples_per_insert: f64,
    /// Minimum table size before sampling is admitted
    pub min_size_to_sample: u64,
    /// Lower bound of the admissible error window
    pub min_diff: f64,
    /// Upper bound of the admissible error window
    pub max_diff: f64,
    /// Total inserts recorded
    pub inserts: u64,
    /// Total samples recorded
    pub samples: u64,
    /// Total deletes recorded
    pub deletes: u64,
}

/// Two-sided admission controller
#[derive(Debug)]
pub struct RateLimiter {
    samples_per_insert: f64,
    min_size_to_sample: u64,
    min_diff: f64,
    max_diff: f64,
    state: Mutex<Counters>,
    insert_cv: Condvar,
    sample_cv: Condvar,
}

impl RateLimiter {
    /// Create a limiter
    ///
    /// Fails with `InvalidArgument` when `samples_per_insert` is not
    /// positive, `min_diff > max_diff`, or `min_size_to_sample` is zero.
    pub fn new(
        samples_per_insert: f64,
        min_size_to_sample: u64,
        min_diff: f64,
        max_diff: f64,
    ) -> Result<Self> {
        if !samples_per_insert.is_finite() || samples_per_insert <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "samples_per_insert must be positive, got {samples_per_insert}"
            )));
        }
        if min_diff > max_diff {
            return Err(Error::InvalidArgument(format!(
                "min_diff ({min_diff}) must not exceed max_diff ({max_diff})"
            )));
        }
        if min_size_to_sample == 0 {
            return Err(Error::InvalidArgument(
                "min_size_to_sample must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            samples_per_insert,
            min_size_to_sample,
            min_diff,
            max_diff,
            state: Mutex::new(Counters::default()),
            insert_cv: Condvar::new(),
            sample_cv: Condvar::new(),
        })
    }

    /// A limiter that only requires `min_size_to_sample` live items and
    /// otherwise never blocks either side
    pub fn min_size(min_size_to_sample: u64) -> Result<Self> {
        Self::new(1.0, min_size_to_sample, f64::MIN, f64::MAX)
    }

    fn error_for(&self, counters: &Counters) -> f64 {
        let size = (counters.inserts - counters.deletes) as f64;
        self.samples_per_insert * size - counters.samples as f64
    }

    fn can_insert_locked(&self, counters: &Counters) -> bool {
        self.error_for(counters) <= self.max_diff
    }

    fn can_sample_locked(&self, counters: &Counters) -> bool {
        counters.inserts - counters.deletes >= self.min_size_to_sample
            && self.error_for(counters) >= self.min_diff
    }

    /// Whether an insert would currently be admitted
    pub fn can_insert(&self) -> bool {
        self.can_insert_locked(&self.state.lock())
    }

    /// Whether a sample would currently be admitted
    pub fn can_sample(&self) -> bool {
        self.can_sample_locked(&self.state.lock())
    }

    /// Block until an insert is admissible, the token fires, or the
    /// deadline passes
    pub fn await_can_insert(
        &self,
        cancel: &Cancellation,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.await_admission(cancel, timeout, |counters| self.can_insert_locked(counters), true)
    }

    /// Block until a sample is admissible, the token fires, or the
    /// deadline passes
    pub fn await_can_sample(
        &self,
        cancel: &Cancellation,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.await_admission(cancel, timeout, |counters| self.can_sample_locked(counters), false)
    }

    fn await_admission(
        &self,
        cancel: &Cancellation,
        timeout: Option<Duration>,
        admissible: impl Fn(&Counters) -> bool,
        insert_side: bool,
    ) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut counters = self.state.lock();
        loop {
            if counters.cancelled || cancel.is_cancelled() {
                return Err(Error::Cancelled("rate limiter wait cancelled".to_string()));
            }
            if admissible(&counters) {
                return Ok(());
            }
            let mut wait = WAKEUP_PERIOD;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::rate_limiter_timeout());
                }
                wait = wait.min(remaining);
            }
            let cv = if insert_side {
                &self.insert_cv
            } else {
                &self.sample_cv
            };
            // Spurious and timed wakeups both fall through to the re-test.
            let _ = cv.wait_for(&mut counters, wait);
        }
    }

    /// Record a committed insert and wake blocked samplers
    pub fn record_insert(&self) {
        let mut counters = self.state.lock();
        counters.inserts += 1;
        drop(counters);
        self.sample_cv.notify_all();
    }

    /// Record a committed sample and wake blocked inserters
    pub fn record_sample(&self) {
        let mut counters = self.state.lock();
        counters.samples += 1;
        drop(counters);
        self.insert_cv.notify_all();
    }

    /// Record a committed delete and wake both sides. Deletes themselves
    /// are never blocked.
    pub fn record_delete(&self) {
        let mut counters = self.state.lock();
        debug_assert!(counters.deletes < counters.inserts);
        counters.deletes += 1;
        drop(counters);
        self.insert_cv.notify_all();
        self.sample_cv.notify_all();
    }

    /// Cancel every pending and future wait
    pub fn cancel_all(&self) {
        let mut counters = self.state.lock();
        counters.cancelled = true;
        drop(counters);
        self.insert_cv.notify_all();
        self.sample_cv.notify_all();
    }

    /// Zero the counters, waking both sides
    pub fn reset_counters(&self) {
        let mut counters = self.state.lock();
        counters.inserts = 0;
        counters.samples = 0;
        counters.deletes = 0;
        drop(counters);
        self.insert_cv.notify_all();
        self.sample_cv.notify_all();
    }

    /// Configuration plus current counters
    pub fn info(&self) -> RateLimiterInfo {
        let counters = self.state.lock();
        RateLimiterInfo {
            samples_per_insert: self.samples_per_insert,
            min_size_to_sample: self.min_size_to_sample,
            min_diff: self.min_diff,
            max_diff: self.max_diff,
            inserts: counters.inserts,
            samples: counters.samples,
            deletes: counters.deletes,
        }
    }

    /// Serializable snapshot of configuration and counters
    pub fn checkpoint(&self) -> RateLimiterCheckpoint {
        let info = self.info();
        RateLimiterCheckpoint {
            samples_per_insert: info.samples_per_insert,
            min_size_to_sample: info.min_size_to_sample,
            min_diff: info.min_diff,
            max_diff: info.max_diff,
            inserts: info.inserts,
            samples: info.samples,
            deletes: info.deletes,
        }
    }

    /// Rebuild a limiter resuming a checkpointed coupling
    pub fn from_checkpoint(checkpoint: &RateLimiterCheckpoint) -> Result<Self> {
        let limiter = Self::new(
            checkpoint.samples_per_insert,
            checkpoint.min_size_to_sample,
            checkpoint.min_diff,
            checkpoint.max_diff,
        )?;
        {
            let mut counters = limiter.state.lock();
            counters.inserts = checkpoint.inserts;
            counters.samples = checkpoint.samples;
            counters.deletes = checkpoint.deletes;
        }
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_config_validation() {
        assert!(RateLimiter::new(0.0, 1, -1.0, 1.0).is_err());
        assert!(RateLimiter::new(-2.0, 1, -1.0, 1.0).is_err());
        assert!(RateLimiter::new(1.0, 1, 2.0, 1.0).is_err());
        assert!(RateLimiter::new(1.0, 0, -1.0, 1.0).is_err());
        assert!(RateLimiter::new(1.0, 1, -1.0, 1.0).is_ok());
    }

    #[test]
    fn test_sample_requires_min_size() {
        let limiter = RateLimiter::min_size(2).unwrap();
        assert!(limiter.can_insert());
        assert!(!limiter.can_sample());

        limiter.record_insert();
        assert!(!limiter.can_sample());
        limiter.record_insert();
        assert!(limiter.can_sample());

        limiter.record_delete();
        assert!(!limiter.can_sample());
    }

    #[test]
    fn test_error_window_coupling() {
        // samples_per_insert=2: each insert allows two samples.
        let limiter = RateLimiter::new(2.0, 1, -1.0, 3.0).unwrap();

        assert!(limiter.can_insert());
        limiter.record_insert(); // error = 2
        assert!(limiter.can_insert());
        limiter.record_insert(); // error = 4
        assert!(!limiter.can_insert());

        limiter.record_sample(); // error = 3
        assert!(limiter.can_insert());
    }

    #[test]
    fn test_min_diff_blocks_sampler() {
        let limiter = RateLimiter::new(1.0, 1, 0.0, f64::MAX).unwrap();
        limiter.record_insert(); // error = 1
        assert!(limiter.can_sample());
        limiter.record_sample(); // error = 0
        assert!(limiter.can_sample());
        limiter.record_sample(); // error = -1
        assert!(!limiter.can_sample());
    }

    #[test]
    fn test_await_timeout_is_limiter_timeout() {
        let limiter = RateLimiter::min_size(1).unwrap();
        let err = limiter
            .await_can_sample(&Cancellation::new(), Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(err.is_rate_limiter_timeout());
    }

    #[test]
    fn test_await_wakes_on_insert() {
        let limiter = Arc::new(RateLimiter::min_size(1).unwrap());
        let waiter = Arc::clone(&limiter);
        let handle = thread::spawn(move || {
            waiter.await_can_sample(&Cancellation::new(), Some(Duration::from_secs(5)))
        });

        thread::sleep(Duration::from_millis(20));
        limiter.record_insert();
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_cancel_all_unblocks_waiters() {
        let limiter = Arc::new(RateLimiter::min_size(1).unwrap());
        let waiter = Arc::clone(&limiter);
        let handle =
            thread::spawn(move || waiter.await_can_sample(&Cancellation::new(), None));

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        limiter.cancel_all();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_token_cancellation_unblocks_within_period() {
        let limiter = Arc::new(RateLimiter::min_size(1).unwrap());
        let cancel = Cancellation::new();
        let waiter = Arc::clone(&limiter);
        let token = cancel.clone();
        let handle = thread::spawn(move || waiter.await_can_sample(&token, None));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_checkpoint_roundtrip_resumes_coupling() {
        let limiter = RateLimiter::new(2.0, 1, -1.0, 3.0).unwrap();
        limiter.record_insert();
        limiter.record_insert();
        limiter.record_sample();

        let restored = RateLimiter::from_checkpoint(&limiter.checkpoint()).unwrap();
        assert_eq!(restored.checkpoint(), limiter.checkpoint());
        assert_eq!(restored.can_insert(), limiter.can_insert());
        assert_eq!(restored.can_sample(), limiter.can_sample());
    }

    #[test]
    fn test_reset_counters() {
        let limiter = RateLimiter::min_size(1).unwrap();
        limiter.record_insert();
        limiter.record_sample();
        limiter.reset_counters();

        let info = limiter.info();
        assert_eq!((info.inserts, info.samples, info.deletes), (0, 0, 0));
        assert!(!limiter.can_sample());
    }
}
