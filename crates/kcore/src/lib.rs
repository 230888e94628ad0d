//! The concurrency core of the kernel: kutex wait queues, sleeping mutexes and
//! condition variables, the thread state machine, the interrupt worker and the
//! thread/process exit protocol built on top of them.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod config;
pub mod error;
mod kernel;
mod random;
pub mod stdio;
mod subscriber;
pub mod sync;
pub mod task;

pub use self::{
    kernel::{boot, kernel, Kernel},
    random::EntropyPool,
    subscriber::KernelSubscriber,
};
