use core::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use spin::mutex::{SpinMutex, SpinMutexGuard};

use crate::imp::interrupts as imp;

/// Proof that interrupts are disabled on the current hardware thread.
///
/// Only handed out by [`without`], so holding a reference to one means the caller is
/// inside an interrupt-free critical section.
#[non_exhaustive]
#[derive(Debug)]
pub struct WithoutInterrupts {
    // Must stay on the hardware thread whose interrupt flag it describes.
    _not_send: PhantomData<*mut ()>,
}

impl WithoutInterrupts {
    /// # Safety
    /// This allows getting an interrupt token, potentially without interrupts actually
    /// being disabled. Any code that depends on the token for safety becomes unsafe in
    /// that case. Interrupt handlers (which run with interrupts off) are the intended
    /// user.
    pub unsafe fn unprotected() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

#[inline]
pub unsafe fn enable() {
    imp::enable();
}

#[inline]
pub unsafe fn disable() {
    imp::disable();
}

#[inline]
pub fn are_enabled() -> bool {
    imp::are_enabled()
}

/// Set the interrupt flag, returning its previous value.
#[inline]
pub unsafe fn set_enabled(enabled: bool) -> bool {
    let were_enabled = are_enabled();
    if enabled != were_enabled {
        if enabled {
            enable();
        } else {
            disable();
        }
    }
    were_enabled
}

/// Run `f` with interrupts disabled, restoring the previous state afterwards.
#[inline]
pub fn without<F, T>(f: F) -> T
where
    F: FnOnce(&mut WithoutInterrupts) -> T,
{
    let _guard = disable_scoped();
    let mut token = WithoutInterrupts {
        _not_send: PhantomData,
    };
    f(&mut token)
}

/// Disable interrupts until the returned guard is dropped.
#[inline]
pub fn disable_scoped() -> InterruptGuard {
    let were_enabled = unsafe { set_enabled(false) };
    InterruptGuard {
        were_enabled,
        _not_send: PhantomData,
    }
}

/// Restores the interrupt flag captured by [`disable_scoped`] when dropped.
#[derive(Debug)]
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct InterruptGuard {
    were_enabled: bool,
    _not_send: PhantomData<*mut ()>,
}

impl InterruptGuard {
    pub fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            unsafe { enable() };
        }
    }
}

/// An interrupt-aware spinlock.
///
/// Locking requires a [`WithoutInterrupts`] token so the holder can never be
/// interrupted by a handler that spins on the same lock.
pub struct SpinLock<T> {
    inner: SpinMutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinMutex::new(value),
        }
    }

    pub fn lock<'a>(&'a self, _g: &'a WithoutInterrupts) -> SpinLockGuard<'a, T> {
        SpinLockGuard(self.inner.lock())
    }

    pub fn try_lock<'a>(&'a self, _g: &'a WithoutInterrupts) -> Option<SpinLockGuard<'a, T>> {
        self.inner.try_lock().map(SpinLockGuard)
    }

    pub fn with<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&mut T) -> U,
    {
        without(|g| {
            let mut guard = self.lock(g);
            f(&mut guard)
        })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> Default for SpinLock<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct SpinLockGuard<'a, T>(SpinMutexGuard<'a, T>);

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
