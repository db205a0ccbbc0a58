//! OS signal routing
//!
//! Watched signals are redirected to the kernel's doorbell: the installed
//! handler only writes the signal number as one byte, which is
//! async-signal-safe. The kernel thread then hands each observed signal to
//! the tasks watching it, waking the ones blocked in `SigWait` and queueing
//! it for the others.
//!
//! Signal dispositions are process-wide, so only one kernel may route
//! signals at a time.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use rustc_hash::{FxHashMap, FxHashSet};
use spindle_sdk::{TaskError, TaskId};

use crate::defaults::MAX_SIGNAL;

/// Doorbell write end used by the handler; -1 when no kernel routes signals
static SIGNAL_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn route_signal(signo: libc::c_int) {
    let fd = SIGNAL_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = signo as u8;
        // SAFETY: write(2) is async-signal-safe; a full doorbell drops the
        // byte, which is fine since a wake-up is already pending
        unsafe {
            libc::write(fd, (&byte as *const u8).cast(), 1);
        }
    }
}

fn check_signal(signo: i32) -> Result<(), TaskError> {
    if (1..=MAX_SIGNAL).contains(&signo) {
        Ok(())
    } else {
        Err(TaskError::IllegalState(format!(
            "invalid signal number {}",
            signo
        )))
    }
}

/// Per-kernel signal bookkeeping
#[derive(Default)]
pub(crate) struct SignalRouter {
    /// Watchers per signal, in watch order
    watchers: FxHashMap<i32, Vec<TaskId>>,
    /// Observed but not yet consumed, per task
    pending: FxHashMap<TaskId, VecDeque<i32>>,
    /// Tasks blocked in `SigWait`
    waiting: FxHashSet<TaskId>,
    /// Disposition in force before we took each signal over
    saved: FxHashMap<i32, libc::sigaction>,
    /// True while this router holds `SIGNAL_FD`
    claimed: bool,
}

impl SignalRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, fd: RawFd) -> Result<(), TaskError> {
        if self.claimed {
            return Ok(());
        }
        SIGNAL_FD
            .compare_exchange(-1, fd, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                TaskError::IllegalState("another kernel is already routing signals".into())
            })?;
        self.claimed = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.claimed {
            SIGNAL_FD.store(-1, Ordering::Release);
            self.claimed = false;
        }
    }

    /// Route `signals` to `task`, redirecting OS delivery to `doorbell_fd`
    pub(crate) fn watch(
        &mut self,
        task: TaskId,
        signals: &[i32],
        doorbell_fd: RawFd,
    ) -> Result<(), TaskError> {
        for &signo in signals {
            check_signal(signo)?;
        }
        self.claim(doorbell_fd)?;
        for &signo in signals {
            if !self.watchers.contains_key(&signo) {
                let old = match install(signo) {
                    Ok(old) => old,
                    Err(e) => {
                        if self.watchers.is_empty() {
                            self.release();
                        }
                        return Err(e);
                    }
                };
                self.saved.insert(signo, old);
                log::debug!("routing signal {} to the doorbell", signo);
            }
            let watchers = self.watchers.entry(signo).or_default();
            if !watchers.contains(&task) {
                watchers.push(task);
            }
        }
        Ok(())
    }

    /// Stop routing `signals` to `task`
    pub(crate) fn unwatch(&mut self, task: TaskId, signals: &[i32]) -> Result<(), TaskError> {
        for &signo in signals {
            check_signal(signo)?;
        }
        for &signo in signals {
            self.remove_watcher(signo, task);
        }
        if !self.is_watching(task) {
            self.pending.remove(&task);
        }
        Ok(())
    }

    fn remove_watcher(&mut self, signo: i32, task: TaskId) {
        let Some(watchers) = self.watchers.get_mut(&signo) else {
            return;
        };
        watchers.retain(|&t| t != task);
        if watchers.is_empty() {
            self.watchers.remove(&signo);
            self.restore(signo);
        }
        if self.watchers.is_empty() {
            self.release();
        }
    }

    fn restore(&mut self, signo: i32) {
        if let Some(old) = self.saved.remove(&signo) {
            // SAFETY: `old` was filled in by sigaction for this signal
            if unsafe { libc::sigaction(signo, &old, std::ptr::null_mut()) } != 0 {
                log::warn!(
                    "failed to restore signal {}: {}",
                    signo,
                    io::Error::last_os_error()
                );
            } else {
                log::debug!("restored disposition of signal {}", signo);
            }
        }
    }

    /// Drop every trace of a terminating task
    pub(crate) fn forget(&mut self, task: TaskId) {
        let signals: Vec<i32> = self
            .watchers
            .iter()
            .filter(|(_, w)| w.contains(&task))
            .map(|(&s, _)| s)
            .collect();
        for signo in signals {
            self.remove_watcher(signo, task);
        }
        self.pending.remove(&task);
        self.waiting.remove(&task);
    }

    /// True if `task` watches at least one signal
    pub(crate) fn is_watching(&self, task: TaskId) -> bool {
        self.watchers.values().any(|w| w.contains(&task))
    }

    /// Oldest unconsumed signal for `task`
    pub(crate) fn take_pending(&mut self, task: TaskId) -> Option<i32> {
        self.pending.get_mut(&task)?.pop_front()
    }

    /// Mark `task` as blocked in `SigWait`
    pub(crate) fn set_waiting(&mut self, task: TaskId) {
        self.waiting.insert(task);
    }

    /// Remove `task` from the blocked set (cancellation hook)
    pub(crate) fn stop_waiting(&mut self, task: TaskId) {
        self.waiting.remove(&task);
    }

    /// Hand an observed signal to its watchers
    ///
    /// Returns the watchers that were blocked in `SigWait`; they must be
    /// resumed with the signal. Everyone else gets it queued.
    pub(crate) fn deliver(&mut self, signo: i32) -> Vec<TaskId> {
        let Some(watchers) = self.watchers.get(&signo) else {
            log::debug!("signal {} arrived with no watcher", signo);
            return Vec::new();
        };
        let mut woken = Vec::new();
        for &task in watchers {
            if self.waiting.remove(&task) {
                woken.push(task);
            } else {
                self.pending.entry(task).or_default().push_back(signo);
            }
        }
        woken
    }

    /// True while any disposition is redirected
    pub(crate) fn is_active(&self) -> bool {
        !self.watchers.is_empty()
    }

    /// Restore every disposition and release the doorbell descriptor
    pub(crate) fn restore_all(&mut self) {
        let signals: Vec<i32> = self.saved.keys().copied().collect();
        for signo in signals {
            self.restore(signo);
        }
        self.watchers.clear();
        self.pending.clear();
        self.waiting.clear();
        self.release();
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        self.restore_all();
    }
}

/// Install the routing handler for `signo`, returning the old disposition
fn install(signo: i32) -> Result<libc::sigaction, TaskError> {
    // SAFETY: both structs are fully initialised before use and the handler
    // only performs async-signal-safe work
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = route_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        let mut old: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signo, &action, &mut old) != 0 {
            return Err(TaskError::from(io::Error::last_os_error()));
        }
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_signals_are_rejected() {
        let mut router = SignalRouter::new();
        let task = TaskId::new();
        assert!(matches!(
            router.watch(task, &[0], -1),
            Err(TaskError::IllegalState(_))
        ));
        assert!(router.unwatch(task, &[MAX_SIGNAL + 1]).is_err());
        assert!(!router.is_active());
        assert!(!router.claimed);
    }

    #[test]
    fn test_delivery_wakes_waiters_and_queues_for_others() {
        let mut router = SignalRouter::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        // Bookkeeping only; no disposition is touched
        router.watchers.insert(libc::SIGUSR1, vec![a, b]);
        router.set_waiting(a);

        assert_eq!(router.deliver(libc::SIGUSR1), vec![a]);
        assert_eq!(router.take_pending(a), None);
        assert_eq!(router.take_pending(b), Some(libc::SIGUSR1));
        assert_eq!(router.take_pending(b), None);

        // Unwatched signals are ignored
        assert!(router.deliver(libc::SIGUSR2).is_empty());

        router.watchers.clear();
    }

    #[test]
    fn test_forget_clears_task_state() {
        let mut router = SignalRouter::new();
        let task = TaskId::new();
        router.watchers.insert(libc::SIGHUP, vec![task]);
        router.pending.entry(task).or_default().push_back(libc::SIGHUP);
        router.set_waiting(task);

        router.forget(task);
        assert!(!router.is_watching(task));
        assert!(!router.is_active());
        assert_eq!(router.take_pending(task), None);
    }
}
