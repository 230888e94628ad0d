use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
};
use core::{
    fmt::{Debug, Display},
    num::{NonZeroU64, NonZeroUsize},
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use hal::{
    interrupts,
    task::{Context, Entry},
};
use log::{debug, trace, warn};

use super::{process::Process, scheduler, state::AtomicState, State};
use crate::{
    error::KernResult,
    sync::kutex::{self, WAKE_ALL},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn as_nonzero_usize(self) -> NonZeroUsize {
        NonZeroUsize::new(self.0.get() as usize).expect("thread id does not fit in usize")
    }
}

#[derive(Clone)]
pub struct Thread(Arc<Inner>);

impl Thread {
    fn new(name: Option<String>, process: Option<Arc<Process>>, state: State) -> Self {
        Self(Arc::new(Inner {
            id: allocate_id(),
            name,
            state: AtomicState::new(state),
            wait_address: AtomicUsize::new(0),
            signal_pending: AtomicBool::new(false),
            context: Context::new(),
            process,
            reaped: AtomicU32::new(0),
        }))
    }

    /// Adopt an execution context that the kernel did not start itself, such as the
    /// boot context of a hardware thread. It is already running.
    pub(super) fn bootstrap(hwt: usize) -> Self {
        let name = alloc::format!("<main {}>", hwt);
        Self::new(Some(name), None, State::Runnable)
    }

    pub fn id(&self) -> ThreadId {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn process(&self) -> Option<&Arc<Process>> {
        self.0.process.as_ref()
    }

    pub fn state(&self) -> State {
        self.0.state.load(Ordering::Acquire)
    }

    pub(super) fn state_cell(&self) -> &AtomicState {
        &self.0.state
    }

    pub(crate) fn context(&self) -> &Context {
        &self.0.context
    }

    /// The kutex address this thread is parked on, if any.
    pub fn wait_address(&self) -> Option<usize> {
        match self.0.wait_address.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    pub(crate) fn set_wait_address(&self, addr: Option<usize>) {
        self.0
            .wait_address
            .store(addr.unwrap_or(0), Ordering::Release);
    }

    /// Deliver a signal. Interruptible waits of this thread give up; uninterruptible
    /// ones are not affected.
    pub fn send_signal(&self) {
        trace!("signal -> {}", self);
        self.0.signal_pending.store(true, Ordering::SeqCst);
        self.0.context.resume();
    }

    pub fn signal_pending(&self) -> bool {
        self.0.signal_pending.load(Ordering::SeqCst)
    }

    /// Clear the pending signal, returning whether there was one.
    pub fn take_signal(&self) -> bool {
        self.0.signal_pending.swap(false, Ordering::SeqCst)
    }

    /// Block until this thread has exited and its resources have been reclaimed.
    ///
    /// Threads adopted through [`current`](super::current) are never reaped, so joining
    /// one of them never returns.
    pub fn join(&self) {
        while self.0.reaped.load(Ordering::Acquire) == 0 {
            kutex::wait(&self.0.reaped, 0, false);
        }
    }

    pub fn is_reaped(&self) -> bool {
        self.0.reaped.load(Ordering::Acquire) != 0
    }

    pub(crate) fn mark_reaped(&self) {
        self.0.reaped.store(1, Ordering::Release);
        kutex::wake(&self.0.reaped, WAKE_ALL);
    }

    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Thread {}

impl Display for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "<{}>", name)
        } else {
            write!(f, "{:#x}", self.id().0)
        }
    }
}

impl Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    pub fn new() -> Self {
        Self { name: None }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Start a new thread of `process` running `f`. The thread begins in
    /// [`State::None`] and is made runnable once its context exists.
    pub fn spawn<F>(self, process: &Arc<Process>, f: F) -> KernResult<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = Thread::new(self.name, Some(process.clone()), State::None);
        process.attach(&thread)?;

        let entry: Entry = {
            let thread = thread.clone();
            Box::new(move || run(thread, f))
        };

        if let Err(err) = thread.context().start(thread.name(), entry) {
            warn!("failed to start {} in {}: {}", thread, process, err);
            process.forget_unstarted(&thread);
            scheduler().set_thread_state(&thread, State::Dead, false);
            return Err(err.into());
        }

        debug!("spawned {} in {}", thread, process);
        scheduler().set_thread_state(&thread, State::Runnable, false);
        Ok(thread)
    }
}

pub fn spawn<F>(process: &Arc<Process>, f: F) -> KernResult<Thread>
where
    F: FnOnce() + Send + 'static,
{
    Builder::new().spawn(process, f)
}

fn run<F: FnOnce()>(thread: Thread, f: F) {
    scheduler().install_current(thread.clone());
    while thread.state() == State::None {
        interrupts::without(|g| scheduler().switch(g));
    }

    f();
    super::process::exit_current(thread);
}

struct Inner {
    id: ThreadId,
    name: Option<String>,
    state: AtomicState,
    wait_address: AtomicUsize,
    signal_pending: AtomicBool,
    context: Context,
    process: Option<Arc<Process>>,
    reaped: AtomicU32,
}

impl Drop for Inner {
    fn drop(&mut self) {
        trace!("thread {:#x} dropped", self.id.0);
    }
}

fn allocate_id() -> ThreadId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let val = COUNTER.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(val)
        .map(ThreadId)
        .expect("thread id counter overflow")
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let a = Thread::new(None, None, State::None);
        let b = Thread::new(None, None, State::None);
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_u64() > 0);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn display_prefers_the_name() {
        let named = Thread::new(Some("worker".into()), None, State::None);
        assert_eq!(named.to_string(), "<worker>");

        let anonymous = Thread::new(None, None, State::None);
        assert_eq!(
            anonymous.to_string(),
            alloc::format!("{:#x}", anonymous.id().as_u64())
        );
    }

    #[test]
    fn signals_are_taken_once() {
        let thread = Thread::new(None, None, State::Runnable);
        assert!(!thread.signal_pending());
        thread.send_signal();
        assert!(thread.signal_pending());
        assert!(thread.take_signal());
        assert!(!thread.take_signal());
    }

    #[test]
    fn spawned_thread_runs_and_is_reaped() {
        let process = Process::new("thread-spawn");
        let ran = Arc::new(AtomicBool::new(false));
        let thread = {
            let ran = ran.clone();
            Builder::new()
                .name("spawned")
                .spawn(&process, move || {
                    let me = super::super::current();
                    assert_eq!(me.name(), Some("spawned"));
                    assert_eq!(me.state(), State::Runnable);
                    ran.store(true, Ordering::Release);
                })
                .unwrap()
        };

        thread.join();
        assert!(ran.load(Ordering::Acquire));
        assert!(thread.is_reaped());
        assert_eq!(thread.state(), State::Dead);
        assert_eq!(process.thread_count(), 0);
    }
}
