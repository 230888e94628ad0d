//! Sleeping synchronization primitives.

mod condvar;
pub mod kutex;
mod mutex;
mod wait_list;

pub use self::{
    condvar::Condvar,
    mutex::{
        CurrentThread, LockState, Mutex, MutexExt, MutexGuard, RawMutex, ReentrantMutex,
        ReentrantMutexGuard,
    },
    wait_list::{Handle, WaitList},
};
