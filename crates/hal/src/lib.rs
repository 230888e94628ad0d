//! Hardware abstraction for the concurrency core.
//!
//! Two backends exist. On bare metal (`target_os = "none"`) the interrupt flag is the
//! real CPU flag and execution contexts are switched by the architecture layer. On a
//! hosted target every execution context is an OS thread and the interrupt flag is
//! emulated per OS thread, which is what the test suite runs on.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[cfg(not(target_os = "none"))]
mod hosted;
#[cfg(not(target_os = "none"))]
use crate::hosted as imp;

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
use crate::x86_64 as imp;

pub mod interrupts;
pub mod task;
pub mod time;
