//! Threads, processes and the interrupt worker.

pub mod process;
mod scheduler;
mod state;
pub mod thread;
pub mod worker;

pub use self::{
    process::{Process, ProcessId},
    scheduler::{Scheduler, Wakeup},
    state::State,
    thread::{spawn, Builder, Thread, ThreadId},
    worker::{InterruptWorker, WorkItem},
};

pub fn scheduler() -> &'static Scheduler {
    &crate::kernel::instance().scheduler
}

/// The thread running on this hardware thread.
pub fn current() -> Thread {
    scheduler().current()
}

pub fn signal_is_pending() -> bool {
    current().signal_pending()
}
