//! Per-context wall-clock deadline guard.
//!
//! A [`DeadlineGuard`] holds one armed deadline (absolute unix millis, `0` meaning
//! "no limit"). Each execution context owns its own guard; candidate code reaches it
//! either explicitly through [`crate::unit::TestContext::checkpoint`] or ambiently
//! through [`checkpoint`], which consults the guard installed on the current thread.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Raised by a checkpoint once the armed deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stopping test as max time exceeded (deadline {deadline_ms} ms)")]
pub struct DeadlineExceeded {
    /// Deadline that was exceeded, unix millis. `0` when the guard was torn down.
    pub deadline_ms: u64,
}

/// Armed-deadline state for one execution context.
#[derive(Debug, Default)]
pub struct DeadlineGuard {
    deadline_ms: AtomicU64,
    poisoned: AtomicBool,
}

impl DeadlineGuard {
    /// New disarmed guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm with an absolute deadline in unix millis. `0` disables the limit.
    ///
    /// Re-arming overwrites the previous deadline.
    pub fn arm(&self, deadline_epoch_ms: u64) {
        self.deadline_ms.store(deadline_epoch_ms, Ordering::SeqCst);
    }

    /// Arm relative to now. A zero budget disables the limit.
    pub fn arm_after(&self, budget: Duration) -> u64 {
        let deadline = if budget.is_zero() {
            0
        } else {
            let budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
            now_epoch_ms().saturating_add(budget_ms)
        };
        self.arm(deadline);
        deadline
    }

    /// Clear the deadline.
    pub fn disarm(&self) {
        self.deadline_ms.store(0, Ordering::SeqCst);
    }

    /// Armed deadline, if any.
    pub fn deadline_ms(&self) -> Option<u64> {
        match self.deadline_ms.load(Ordering::SeqCst) {
            0 => None,
            deadline => Some(deadline),
        }
    }

    /// Permanently fail every later checkpoint.
    ///
    /// Used when a context thread is abandoned: disarming would let a runaway
    /// loop spin forever, poisoning makes its next checkpoint unwind.
    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    /// True once the guard has been poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Compare now against the armed deadline.
    pub fn checkpoint(&self) -> Result<(), DeadlineExceeded> {
        let deadline_ms = self.deadline_ms.load(Ordering::Relaxed);
        if self.poisoned.load(Ordering::Relaxed) {
            return Err(DeadlineExceeded { deadline_ms });
        }
        if deadline_ms != 0 && now_epoch_ms() > deadline_ms {
            return Err(DeadlineExceeded { deadline_ms });
        }
        Ok(())
    }
}

thread_local! {
    static AMBIENT_GUARD: RefCell<Option<Arc<DeadlineGuard>>> = const { RefCell::new(None) };
}

/// Restores the previously installed ambient guard on drop.
#[derive(Debug)]
pub(crate) struct AmbientGuard {
    previous: Option<Arc<DeadlineGuard>>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT_GUARD.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Install `guard` as the ambient guard of the calling thread.
pub(crate) fn install(guard: Arc<DeadlineGuard>) -> AmbientGuard {
    let previous = AMBIENT_GUARD.with(|slot| slot.borrow_mut().replace(guard));
    AmbientGuard { previous }
}

/// Ambient checkpoint returning a `Result`. No-op when no guard is installed.
pub fn try_checkpoint() -> Result<(), DeadlineExceeded> {
    AMBIENT_GUARD.with(|slot| match slot.borrow().as_ref() {
        Some(guard) => guard.checkpoint(),
        None => Ok(()),
    })
}

/// Ambient checkpoint for instrumented candidate code.
///
/// Unwinds with a [`DeadlineExceeded`] payload once the deadline has passed; the
/// container catches the unwind and records the test as timed out. The unwind
/// bypasses the panic hook, so nothing is printed.
pub fn checkpoint() {
    if let Err(exceeded) = try_checkpoint() {
        std::panic::resume_unwind(Box::new(exceeded));
    }
}

/// Current unix timestamp in milliseconds.
pub fn now_epoch_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration
        .as_secs()
        .saturating_mul(1000)
        .saturating_add(u64::from(duration.subsec_millis()))
}
