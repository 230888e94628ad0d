//! Processes and the thread exit protocol.
//!
//! A process counts the threads that have not begun exiting. The thread that brings
//! that count to zero is the only one allowed to run the process's last-thread hooks.
//! A thread can never free its own stack, so the final step of every exit is handing
//! a reap item to the interrupt worker, which waits for the dead context to leave the
//! CPU before it lets go of it.

use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::{
    fmt::Display,
    mem,
    num::NonZeroU64,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use hal::interrupts::{self, SpinLock};
use log::{debug, info, warn};
use tracing::instrument;

use super::{thread::Thread, worker::WorkItem, State};
use crate::{
    error::{KernErrorKind, KernResult},
    kernel::kernel,
    sync::{
        kutex::{self, WAKE_ALL},
        Mutex,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(NonZeroU64);

impl ProcessId {
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

type TeardownHook = Box<dyn FnOnce(&Process) + Send>;

pub struct Process {
    id: ProcessId,
    name: String,
    threads: Mutex<ThreadTable>,
    teardown_hooks: SpinLock<Vec<TeardownHook>>,
    torn_down: AtomicU32,
}

#[derive(Debug, Default)]
struct ThreadTable {
    threads: Vec<Thread>,
    /// Threads that have not started exiting.
    not_exiting: usize,
    /// Latched once the process as a whole is on its way out.
    exiting: bool,
    exit_status: Option<i32>,
}

impl ThreadTable {
    /// Take `thread` out of the live count. `true` if it was the last one.
    fn leave(&mut self, thread: &Thread, process: &Process) -> bool {
        assert!(
            self.not_exiting > 0,
            "{} leaving {} with no live threads",
            thread,
            process
        );
        self.not_exiting -= 1;
        let last = self.not_exiting == 0;
        if last {
            self.exiting = true;
        }
        last
    }
}

impl Process {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: allocate_id(),
            name: name.to_string(),
            threads: Mutex::new(ThreadTable::default()),
            teardown_hooks: SpinLock::new(Vec::new()),
            torn_down: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register work to run when the last thread begins exiting, on that thread.
    pub fn on_last_thread_exit<F>(&self, hook: F)
    where
        F: FnOnce(&Process) + Send + 'static,
    {
        interrupts::without(|g| self.teardown_hooks.lock(g).push(Box::new(hook)));
    }

    pub fn threads_not_exiting(&self) -> usize {
        self.threads.lock().not_exiting
    }

    /// Number of threads that are attached and not yet reaped.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().threads.len()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.threads.lock().threads.clone()
    }

    pub fn is_exiting(&self) -> bool {
        self.threads.lock().exiting
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.threads.lock().exit_status
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire) != 0
    }

    /// Block until the last-thread hooks have run.
    ///
    /// Returns at once for a process with no attached threads, since nothing would
    /// ever run them. Threads stay attached until after the hooks, so this only
    /// happens before the first spawn.
    pub fn wait_teardown(&self) {
        if !self.is_torn_down() && self.thread_count() == 0 {
            return;
        }
        while self.torn_down.load(Ordering::Acquire) == 0 {
            kutex::wait(&self.torn_down, 0, false);
        }
    }

    /// Start taking the whole process down: no new threads may join and every thread
    /// is signalled so that interruptible waits unwind. Returns `false` if the
    /// decision had already been made, in which case `status` is ignored.
    #[instrument(level = "debug", skip(self), fields(process = %self))]
    pub fn request_exit(&self, status: i32) -> bool {
        let threads = {
            let mut table = self.threads.lock();
            if table.exiting {
                return false;
            }
            table.exiting = true;
            table.exit_status = Some(status);
            table.threads.clone()
        };

        info!("{} exiting with status {}", self, status);
        for thread in threads {
            thread.send_signal();
        }
        true
    }

    pub(super) fn attach(&self, thread: &Thread) -> KernResult<()> {
        let mut table = self.threads.lock();
        if table.exiting {
            return Err(KernErrorKind::ProcessExiting.into());
        }
        table.threads.push(thread.clone());
        table.not_exiting += 1;
        Ok(())
    }

    /// Undo [`attach`](Self::attach) for a thread whose context never started.
    ///
    /// If every other thread exited in the meantime, the caller runs the last-thread
    /// hooks in its place.
    pub(super) fn forget_unstarted(&self, thread: &Thread) {
        let last = self.threads.lock().leave(thread, self);
        if last {
            self.run_teardown();
        }
        self.detach(thread);
    }

    /// Record that `thread` began exiting. Returns `true` for exactly one caller: the
    /// one that saw the count reach zero.
    pub(super) fn thread_exiting(&self, thread: &Thread) -> bool {
        self.threads.lock().leave(thread, self)
    }

    pub(super) fn detach(&self, thread: &Thread) {
        let mut table = self.threads.lock();
        let before = table.threads.len();
        table.threads.retain(|t| t != thread);
        if table.threads.len() == before {
            warn!("{} was not attached to {}", thread, self);
        }
    }

    #[instrument(level = "debug", skip_all, fields(process = %self))]
    fn run_teardown(&self) {
        let hooks = interrupts::without(|g| mem::take(&mut *self.teardown_hooks.lock(g)));
        debug!("last thread of {} exited, running {} hooks", self, hooks.len());
        for hook in hooks {
            hook(self);
        }

        let previous = self.torn_down.swap(1, Ordering::AcqRel);
        assert_eq!(previous, 0, "{} torn down twice", self);
        kutex::wake(&self.torn_down, WAKE_ALL);
    }
}

impl Display for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.name, self.id.0)
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

/// The final act of every kernel thread.
///
/// Runs on the exiting thread: takes it out of its process's live count (running the
/// last-thread hooks if it was the last one), marks it dead and queues its reaping on
/// the interrupt worker. After this returns the thread's context only unwinds.
pub(super) fn exit_current(thread: Thread) {
    if let Some(process) = thread.process() {
        if process.thread_exiting(&thread) {
            process.run_teardown();
        }
    }

    let kernel = kernel();
    let reap_item = {
        let thread = thread.clone();
        WorkItem::new("reap", move || reap(thread))
    };

    interrupts::without(|g| {
        kernel.scheduler.set_thread_state(&thread, State::Dead, false);
        kernel.scheduler.retire_current(g);
        kernel.worker().schedule_work(reap_item, g);
    });
    debug!("{} exited", thread);
}

fn reap(thread: Thread) {
    let state = kernel().scheduler.get_thread_state(&thread);
    assert_eq!(state, State::Dead, "reaping live thread {}", thread);

    thread.context().wait_finished();
    if let Some(process) = thread.process() {
        process.detach(&thread);
    }
    debug!("reaped {}", thread);
    thread.mark_reaped();
}

fn allocate_id() -> ProcessId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let val = COUNTER.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(val)
        .map(ProcessId)
        .expect("process id counter overflow")
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;
    use crate::task::spawn;

    #[test]
    fn attach_after_exit_is_refused() {
        let process = Process::new("refuses");
        assert!(process.request_exit(3));
        assert!(!process.request_exit(4));
        assert_eq!(process.exit_status(), Some(3));

        let err = spawn(&process, || {}).unwrap_err();
        assert_eq!(err.kind(), KernErrorKind::ProcessExiting);
        assert_eq!(process.thread_count(), 0);
    }

    #[test]
    fn last_thread_runs_teardown_once() {
        const THREADS: usize = 6;
        let process = Process::new("teardown");
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            process.on_last_thread_exit(move |p| {
                assert_eq!(p.threads_not_exiting(), 0);
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Nobody may exit before everyone has been attached.
        let gate = Arc::new(AtomicU32::new(0));
        let threads: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = gate.clone();
                spawn(&process, move || {
                    while gate.load(Ordering::Acquire) == 0 {
                        kutex::wait(&gate, 0, false);
                    }
                })
                .unwrap()
            })
            .collect();
        assert_eq!(process.threads_not_exiting(), THREADS);

        gate.store(1, Ordering::Release);
        kutex::wake(&*gate, WAKE_ALL);
        process.wait_teardown();
        for thread in &threads {
            thread.join();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(process.is_torn_down());
        assert!(process.is_exiting());
        assert_eq!(process.thread_count(), 0);
    }

    #[test]
    fn abandoned_spawn_after_the_last_exit_runs_teardown() {
        let process = Process::new("abandoned");
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            process.on_last_thread_exit(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        let gate = Arc::new(AtomicU32::new(0));
        let live = {
            let gate = gate.clone();
            spawn(&process, move || {
                while gate.load(Ordering::Acquire) == 0 {
                    kutex::wait(&gate, 0, false);
                }
            })
            .unwrap()
        };

        // Attached by a spawn whose context then fails to start.
        let unstarted = Thread::bootstrap(0);
        process.attach(&unstarted).unwrap();

        gate.store(1, Ordering::Release);
        kutex::wake(&*gate, WAKE_ALL);
        live.join();
        assert_eq!(process.threads_not_exiting(), 1);
        assert!(!process.is_torn_down());

        process.forget_unstarted(&unstarted);
        process.wait_teardown();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(process.is_exiting());
        assert_eq!(process.threads_not_exiting(), 0);
        assert_eq!(process.thread_count(), 0);
        assert!(spawn(&process, || {}).is_err());
    }

    #[test]
    fn waiting_for_a_process_without_threads_returns() {
        let process = Process::new("empty");
        process.wait_teardown();
        assert!(!process.is_torn_down());
    }

    #[test]
    fn display_includes_the_id() {
        let process = Process::new("shown");
        assert_eq!(
            process.to_string(),
            alloc::format!("shown[{}]", process.id().as_u64())
        );
    }
}
