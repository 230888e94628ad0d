//! Execution contexts.
//!
//! A [`Context`] is the saved machine state of one kernel thread. The kernel decides
//! *when* a context may run; this module only knows how to stop the current one and
//! let another one continue.

use alloc::boxed::Box;
use core::fmt::{self, Display};

pub use crate::imp::task::Context;

/// The entry point of a freshly started context.
pub type Entry = Box<dyn FnOnce() + Send + 'static>;

/// The architecture layer could not create a new execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartError;

impl Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to start execution context")
    }
}

/// Identifier of the hardware thread (CPU) executing the caller.
///
/// On hosted targets every OS thread counts as its own hardware thread.
#[inline]
pub fn hw_thread_id() -> usize {
    crate::imp::task::hw_thread_id()
}
