use alloc::vec::Vec;
use core::{
    fmt::Debug,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};

use hal::interrupts::{self, SpinLock};

use super::{kutex, mutex::MutexGuard, wait_list::WaitList};

const WAITING: u32 = 0;
const SIGNALED: u32 = 1;

/// A FIFO condition variable for [`Mutex`](super::Mutex).
///
/// Every waiter parks on a flag word of its own, so [`signal`](Self::signal) wakes
/// exactly the oldest waiter and never a later one.
pub struct Condvar {
    waiters: SpinLock<WaitList<Waiter>>,
}

struct Waiter {
    flag: NonNull<AtomicU32>,
}

// The flag lives on the waiting thread's stack; the waiter entry is removed before
// that frame returns.
unsafe impl Send for Waiter {}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(WaitList::new()),
        }
    }

    /// Release `guard`, wait for a signal, then lock again.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        self.wait_inner(guard, false);
    }

    /// Like [`wait`](Self::wait), but also returns when the calling thread receives a
    /// signal. Returns `false` in that case. The mutex is held again either way.
    pub fn wait_signal<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) -> bool {
        self.wait_inner(guard, true)
    }

    /// Wait until `condition` no longer holds.
    pub fn wait_while<T, F>(&self, guard: &mut MutexGuard<'_, T>, mut condition: F)
    where
        T: ?Sized,
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            self.wait(guard);
        }
    }

    fn wait_inner<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>, interruptible: bool) -> bool {
        let flag = AtomicU32::new(WAITING);
        let handle = interrupts::without(|g| {
            self.waiters.lock(g).push_back(Waiter {
                flag: NonNull::from(&flag),
            })
        });

        let signaled = MutexGuard::unlocked(guard, || {
            while flag.load(Ordering::Acquire) == WAITING {
                if !kutex::wait(&flag, WAITING, interruptible) {
                    break;
                }
            }
            flag.load(Ordering::Acquire) == SIGNALED
        });

        if signaled {
            return true;
        }

        // Still queued means nobody signaled us. Otherwise a signaler popped the entry
        // and set the flag at the same time, and the signal counts.
        let abandoned = interrupts::without(|g| self.waiters.lock(g).remove(handle).is_some());
        !abandoned
    }

    /// Wake the longest-waiting thread, if any.
    pub fn signal(&self) -> bool {
        let flag = interrupts::without(|g| {
            let waiter = self.waiters.lock(g).pop_front()?;
            let flag = unsafe { waiter.flag.as_ref() };
            flag.store(SIGNALED, Ordering::Release);
            Some(waiter.flag)
        });

        match flag {
            Some(flag) => {
                kutex::wake(flag.as_ptr(), 1);
                true
            }
            None => false,
        }
    }

    /// Wake every current waiter. Returns how many there were.
    pub fn broadcast(&self) -> usize {
        let flags = interrupts::without(|g| {
            let mut waiters = self.waiters.lock(g);
            let mut flags = Vec::with_capacity(waiters.len());
            while let Some(waiter) = waiters.pop_front() {
                unsafe { waiter.flag.as_ref() }.store(SIGNALED, Ordering::Release);
                flags.push(waiter.flag);
            }
            flags
        });

        for flag in &flags {
            kutex::wake(flag.as_ptr(), 1);
        }
        flags.len()
    }

    pub fn waiter_count(&self) -> usize {
        interrupts::without(|g| self.waiters.lock(g).len())
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Condvar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Condvar")
            .field("waiters", &self.waiter_count())
            .finish()
    }
}
