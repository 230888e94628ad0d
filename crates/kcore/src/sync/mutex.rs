use core::{
    hint,
    num::NonZeroUsize,
    sync::atomic::{AtomicU32, Ordering},
};

use lock_api::{GetThreadId, GuardSend};

use super::kutex::{self, WAKE_ALL};
use crate::{kernel::instance, task};

pub type Mutex<T> = lock_api::Mutex<RawMutex, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawMutex, T>;

/// A mutex the owning thread may lock again while it already holds it.
pub type ReentrantMutex<T> = lock_api::ReentrantMutex<RawMutex, CurrentThread, T>;
pub type ReentrantMutexGuard<'a, T> =
    lock_api::ReentrantMutexGuard<'a, RawMutex, CurrentThread, T>;

const FREE: u32 = 0;
const HELD: u32 = 1;
/// Held, and somebody may be sleeping on the lock word.
const CONTENDED: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held,
    Contended,
}

#[derive(Debug)]
pub struct RawMutex {
    state: AtomicU32,
}

impl RawMutex {
    /// Lock, unless a signal arrives first. Returns `false` without holding the lock
    /// if the wait was interrupted.
    pub fn lock_signal(&self) -> bool {
        self.try_lock_fast() || self.lock_contended(true)
    }

    pub fn state(&self) -> LockState {
        match self.state.load(Ordering::Relaxed) {
            FREE => LockState::Free,
            HELD => LockState::Held,
            CONTENDED => LockState::Contended,
            other => panic!("corrupt mutex word {:#x}", other),
        }
    }

    /// The kutex word waiters park on.
    pub fn lock_word(&self) -> &AtomicU32 {
        &self.state
    }

    fn try_lock_fast(&self) -> bool {
        self.state
            .compare_exchange(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[cold]
    fn lock_contended(&self, interruptible: bool) -> bool {
        loop {
            let mut state = self.spin();

            if state == FREE {
                match self
                    .state
                    .compare_exchange(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
                {
                    Ok(_) => return true,
                    Err(s) => state = s,
                }
            }

            if state == HELD
                && self
                    .state
                    .compare_exchange(HELD, CONTENDED, Ordering::Relaxed, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }

            if !kutex::wait(&self.state, CONTENDED, interruptible) {
                return false;
            }
        }
    }

    #[cold]
    fn wake(&self) {
        // Everyone re-contends; the ones that lose mark the word contended again.
        kutex::wake(&self.state, WAKE_ALL);
    }

    /// Spin a bounded number of times while the lock is contended.
    fn spin(&self) -> u32 {
        let mut spin = instance().config().mutex_spin();
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state != CONTENDED || spin == 0 {
                return state;
            }
            hint::spin_loop();
            spin -= 1;
        }
    }
}

unsafe impl lock_api::RawMutex for RawMutex {
    type GuardMarker = GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        state: AtomicU32::new(FREE),
    };

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_lock_fast()
    }

    #[inline]
    fn lock(&self) {
        if !self.try_lock_fast() {
            self.lock_contended(false);
        }
    }

    #[inline]
    unsafe fn unlock(&self) {
        match self.state.swap(FREE, Ordering::Release) {
            HELD => {}
            CONTENDED => self.wake(),
            _ => panic!("unlock of a mutex that is not held"),
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != FREE
    }
}

/// Signal-aware locking for [`Mutex`].
pub trait MutexExt<T: ?Sized> {
    /// Like `lock`, but gives up and returns `None` if the calling thread receives a
    /// signal while waiting.
    fn lock_signal(&self) -> Option<MutexGuard<'_, T>>;

    fn lock_state(&self) -> LockState;

    fn lock_word(&self) -> &AtomicU32;
}

impl<T: ?Sized> MutexExt<T> for Mutex<T> {
    fn lock_signal(&self) -> Option<MutexGuard<'_, T>> {
        let raw = unsafe { self.raw() };
        if raw.lock_signal() {
            Some(unsafe { self.make_guard_unchecked() })
        } else {
            None
        }
    }

    fn lock_state(&self) -> LockState {
        unsafe { self.raw() }.state()
    }

    fn lock_word(&self) -> &AtomicU32 {
        unsafe { self.raw() }.lock_word()
    }
}

/// Owner identity for [`ReentrantMutex`]: the current kernel thread.
pub struct CurrentThread;

unsafe impl GetThreadId for CurrentThread {
    const INIT: Self = CurrentThread;

    fn nonzero_thread_id(&self) -> NonZeroUsize {
        task::current().id().as_nonzero_usize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_lock_and_unlock() {
        let mutex = Mutex::new(5);
        assert_eq!(mutex.lock_state(), LockState::Free);
        {
            let mut guard = mutex.lock();
            *guard += 1;
            assert_eq!(mutex.lock_state(), LockState::Held);
            assert!(mutex.try_lock().is_none());
        }
        assert_eq!(mutex.lock_state(), LockState::Free);
        assert_eq!(*mutex.lock(), 6);
    }

    #[test]
    fn lock_signal_without_contention_succeeds() {
        let mutex = Mutex::new(());
        let guard = mutex.lock_signal();
        assert!(guard.is_some());
        assert_eq!(mutex.lock_state(), LockState::Held);
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn unlocking_a_free_mutex_panics() {
        let raw = <RawMutex as lock_api::RawMutex>::INIT;
        unsafe { lock_api::RawMutex::unlock(&raw) };
    }

    #[test]
    #[should_panic(expected = "corrupt mutex word")]
    fn invalid_lock_word_is_fatal() {
        let raw = RawMutex {
            state: AtomicU32::new(7),
        };
        raw.state();
    }

    #[test]
    fn reentrant_lock_nests() {
        let mutex = ReentrantMutex::new(7);
        let outer = mutex.lock();
        let inner = mutex.lock();
        assert_eq!(*outer + *inner, 14);
        assert!(mutex.is_owned_by_current_thread());
        drop(inner);
        drop(outer);
        assert!(!mutex.is_locked());
    }
}
