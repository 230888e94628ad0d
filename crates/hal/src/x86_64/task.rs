use alloc::sync::Arc;
use core::{
    fmt::{self, Debug},
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::task::{Entry, StartError};

extern "Rust" {
    fn __arch_context_start(slot: &AtomicPtr<u8>, entry: Entry) -> Result<(), StartError>;
    fn __arch_context_suspend(slot: &AtomicPtr<u8>);
    fn __arch_context_resume(slot: &AtomicPtr<u8>);
    fn __arch_context_wait_finished(slot: &AtomicPtr<u8>);
    fn __arch_hw_thread_id() -> usize;
}

/// Saved stack pointer of a kernel thread, owned by the architecture layer.
#[derive(Clone)]
pub struct Context(Arc<AtomicPtr<u8>>);

impl Context {
    pub fn new() -> Self {
        Self(Arc::new(AtomicPtr::new(ptr::null_mut())))
    }

    pub fn start(&self, _name: Option<&str>, entry: Entry) -> Result<(), StartError> {
        unsafe { __arch_context_start(&self.0, entry) }
    }

    /// # Safety
    /// Must be called by the context itself with interrupts disabled.
    pub unsafe fn suspend(&self) {
        __arch_context_suspend(&self.0);
    }

    pub fn resume(&self) {
        unsafe { __arch_context_resume(&self.0) }
    }

    pub fn wait_finished(&self) {
        unsafe { __arch_context_wait_finished(&self.0) }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context")
            .field(&self.0.load(Ordering::Relaxed))
            .finish()
    }
}

#[inline]
pub(crate) fn hw_thread_id() -> usize {
    unsafe { __arch_hw_thread_id() }
}
