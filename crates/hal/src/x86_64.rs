//! Bare-metal x86_64 backend.
//!
//! Interrupt control and the timestamp counter are handled here. Context switching
//! itself lives in the architecture layer of the kernel image, which provides the
//! `__arch_*` symbols declared in [`task`].

pub mod interrupts;
pub mod task;
pub mod time;
