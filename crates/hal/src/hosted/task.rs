use std::{
    cell::Cell,
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};

use crate::task::{Entry, StartError};

/// A hosted execution context: an OS thread plus a one-shot resume permit.
///
/// `resume` before `suspend` is remembered, so a wake that races ahead of the sleeper
/// is never lost. Spurious returns from `suspend` are allowed; callers re-check their
/// own condition.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

struct Inner {
    permit: Mutex<bool>,
    resumed: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            permit: Mutex::new(false),
            resumed: Condvar::new(),
            handle: Mutex::new(None),
        }))
    }

    /// Give this context its own OS thread running `entry`.
    pub fn start(&self, name: Option<&str>, entry: Entry) -> Result<(), StartError> {
        let mut builder = thread::Builder::new();
        if let Some(name) = name {
            builder = builder.name(name.into());
        }
        let handle = builder.spawn(entry).map_err(|_| StartError)?;
        *lock(&self.0.handle) = Some(handle);
        Ok(())
    }

    /// Stop running until [`resume`](Self::resume) is called.
    ///
    /// # Safety
    /// Must be called from the OS thread that owns this context.
    pub unsafe fn suspend(&self) {
        let mut permit = lock(&self.0.permit);
        while !*permit {
            permit = self
                .0
                .resumed
                .wait(permit)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permit = false;
    }

    pub fn resume(&self) {
        *lock(&self.0.permit) = true;
        self.0.resumed.notify_one();
    }

    /// Block until the context has finished executing and left its stack.
    pub fn wait_finished(&self) {
        let handle = lock(&self.0.handle).take();
        if let Some(handle) = handle {
            // A panic on that thread already reported itself; all we need is that the
            // stack is gone.
            _ = handle.join();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("resume_pending", &*lock(&self.0.permit))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn hw_thread_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    thread_local! {
        static ID: Cell<Option<usize>> = const { Cell::new(None) };
    }

    ID.with(|id| match id.get() {
        Some(id) => id,
        None => {
            let new = NEXT.fetch_add(1, Ordering::Relaxed);
            id.set(Some(new));
            new
        }
    })
}
