//! Cancellable condition variable, grounded in `platform/linux/sched.c` from
//! the original implementation. Upper layers (a future socket-like API) use
//! this to block on a caller-owned mutex with cancellation support, rather
//! than a raw `Condvar`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Outcome of a [`SchedCtx::sleep`] call. The caller's mutex is held on
/// return in both cases — matching the contract of the original `sched_ctx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Woken by `wake_all`, or the deadline elapsed (caller re-checks its
    /// predicate — this may be a spurious wake).
    Woken,
    /// Woken by `interrupt`, or `interrupted` was already set on entry.
    Interrupted,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u32,
}

/// A condition-variable-like object giving blocking sleep with
/// interruption and broadcast wakeup under a caller-owned mutex.
#[derive(Debug)]
pub struct SchedCtx {
    cond: Condvar,
    inner: Mutex<Inner>,
    waiters: AtomicU32,
    interrupted: AtomicBool,
}

impl Default for SchedCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedCtx {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
            inner: Mutex::new(Inner::default()),
            waiters: AtomicU32::new(0),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Block until `wake_all`, `interrupt`, or `deadline` elapses.
    ///
    /// The caller must hold `guard` (from `lock`) on entry; a (possibly new)
    /// guard for the same mutex is returned on exit, so the caller holds the
    /// mutex throughout.
    pub fn sleep<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        deadline: Option<Duration>,
    ) -> (MutexGuard<'a, T>, WakeReason) {
        if self.interrupted.load(Ordering::SeqCst) {
            return (guard, WakeReason::Interrupted);
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let seen_generation = self.inner.lock().unwrap().generation;
        drop(guard);

        let inner_guard = self.inner.lock().unwrap();
        let _final_guard = match deadline {
            Some(d) => {
                let (g, _timeout) = self
                    .cond
                    .wait_timeout_while(inner_guard, d, |inner| inner.generation == seen_generation)
                    .unwrap();
                g
            }
            None => self
                .cond
                .wait_while(inner_guard, |inner| inner.generation == seen_generation)
                .unwrap(),
        };
        drop(_final_guard);

        let new_guard = lock.lock().unwrap();
        let prev = self.waiters.fetch_sub(1, Ordering::SeqCst);
        let now_zero = prev == 1;

        if self.interrupted.load(Ordering::SeqCst) {
            if now_zero {
                self.interrupted.store(false, Ordering::SeqCst);
            }
            (new_guard, WakeReason::Interrupted)
        } else {
            (new_guard, WakeReason::Woken)
        }
    }

    /// Wake every current waiter; does not set `interrupted`.
    pub fn wake_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation = inner.generation.wrapping_add(1);
        drop(inner);
        self.cond.notify_all();
    }

    /// Set the interrupted flag and wake every waiter. Every current and
    /// future waiter observes an interrupted wake until the waiter count
    /// reaches zero, at which point the flag clears.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.generation = inner.generation.wrapping_add(1);
        }
        self.cond.notify_all();
    }

    #[must_use]
    pub fn waiter_count(&self) -> u32 {
        self.waiters.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wake_all_releases_waiter() {
        let sched = Arc::new(SchedCtx::new());
        let lock = Arc::new(Mutex::new(0));

        let sched2 = sched.clone();
        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            let guard = lock2.lock().unwrap();
            let (_guard, reason) = sched2.sleep(&lock2, guard, None);
            reason
        });

        while sched.waiter_count() == 0 {
            thread::yield_now();
        }
        sched.wake_all();
        assert_eq!(handle.join().unwrap(), WakeReason::Woken);
    }

    #[test]
    fn interrupt_then_sleep_returns_interrupted() {
        let sched = SchedCtx::new();
        let lock = Mutex::new(0);
        sched.interrupt();
        let guard = lock.lock().unwrap();
        let (_guard, reason) = sched.sleep(&lock, guard, None);
        assert_eq!(reason, WakeReason::Interrupted);
    }

    #[test]
    fn flag_clears_once_waiters_drain() {
        let sched = Arc::new(SchedCtx::new());
        let lock = Arc::new(Mutex::new(0));

        let sched2 = sched.clone();
        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            let guard = lock2.lock().unwrap();
            sched2.sleep(&lock2, guard, None).1
        });

        while sched.waiter_count() == 0 {
            thread::yield_now();
        }
        sched.interrupt();
        assert_eq!(handle.join().unwrap(), WakeReason::Interrupted);

        // Next sleep succeeds without interruption once waiters reached zero.
        let guard = lock.lock().unwrap();
        let deadline = Some(Duration::from_millis(5));
        let (_guard, reason) = sched.sleep(&lock, guard, deadline);
        assert_eq!(reason, WakeReason::Woken);
    }
}
