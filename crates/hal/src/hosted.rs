//! Hosted backend: OS threads stand in for hardware threads.

pub mod interrupts;
pub mod task;
pub mod time;
