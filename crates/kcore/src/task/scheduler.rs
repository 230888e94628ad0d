use alloc::collections::BTreeMap;
use core::sync::atomic::Ordering;

use hal::{
    interrupts::{self, SpinLock, WithoutInterrupts},
    task::hw_thread_id,
};
use log::trace;

use super::{thread::Thread, State};

/// How a blocked thread came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Another party made the thread runnable.
    Woken,
    /// The thread gave up because a signal is pending.
    Interrupted,
}

/// Owner of every thread's run state.
///
/// A thread only ever moves along the transitions of [`State::can_transition_to`];
/// attempting anything else outside of a wake-only request is a kernel bug and panics.
#[derive(Debug)]
pub struct Scheduler {
    current: SpinLock<BTreeMap<usize, Thread>>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            current: SpinLock::new(BTreeMap::new()),
        }
    }

    /// The thread running on this hardware thread. A context the kernel did not start
    /// is adopted as a runnable bootstrap thread the first time it asks.
    ///
    /// Adopted threads keep their slot for the life of the scheduler: one per CPU on
    /// bare metal, one per OS thread that ever asked on hosted targets.
    pub fn current(&self) -> Thread {
        interrupts::without(|g| self.current_with(g))
    }

    fn current_with(&self, g: &WithoutInterrupts) -> Thread {
        let hwt = hw_thread_id();
        self.current
            .lock(g)
            .entry(hwt)
            .or_insert_with(|| {
                trace!("adopting bootstrap thread for hw thread {}", hwt);
                Thread::bootstrap(hwt)
            })
            .clone()
    }

    /// Claim this hardware thread for `thread`.
    pub(super) fn install_current(&self, thread: Thread) {
        interrupts::without(|g| {
            self.current.lock(g).insert(hw_thread_id(), thread);
        });
    }

    pub(super) fn retire_current(&self, g: &WithoutInterrupts) -> Option<Thread> {
        self.current.lock(g).remove(&hw_thread_id())
    }

    pub fn get_thread_state(&self, thread: &Thread) -> State {
        thread.state()
    }

    /// Move `thread` to `new`.
    ///
    /// With `wake_only` the change only happens if the thread is currently in
    /// [`State::FutexWaiting`]; otherwise nothing changes and `false` is returned. This
    /// is how wakers avoid disturbing threads that already left their wait.
    ///
    /// Making a thread runnable also dispatches it.
    ///
    /// # Panics
    /// On a transition the state table does not allow (unless `wake_only`).
    pub fn set_thread_state(&self, thread: &Thread, new: State, wake_only: bool) -> bool {
        if !self.transition(thread, new, wake_only) {
            return false;
        }
        if new == State::Runnable {
            self.dispatch(thread);
        }
        true
    }

    /// [`set_thread_state`](Self::set_thread_state) without the dispatch, for callers
    /// that hold a spinlock and resume the thread once it is released.
    pub(crate) fn transition(&self, thread: &Thread, new: State, wake_only: bool) -> bool {
        let cell = thread.state_cell();
        let old = if wake_only {
            if !State::FutexWaiting.can_transition_to(new) {
                return false;
            }
            match cell.compare_exchange(
                State::FutexWaiting,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(old) => old,
                Err(_) => return false,
            }
        } else {
            let mut current = cell.load(Ordering::Acquire);
            loop {
                assert!(
                    current.can_transition_to(new),
                    "invalid state transition {:?} -> {:?} for thread {}",
                    current,
                    new,
                    thread
                );
                match cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(old) => break old,
                    Err(actual) => current = actual,
                }
            }
        };

        trace!("thread {}: {:?} -> {:?}", thread, old, new);
        true
    }

    pub(crate) fn dispatch(&self, thread: &Thread) {
        interrupts::without(|g| self.switch_to(thread, g));
    }

    /// Give up the CPU until the current thread is made runnable again, or (if
    /// `interruptible`) until a signal is pending.
    ///
    /// The caller must already have moved itself to [`State::FutexWaiting`].
    pub fn block_current(&self, interruptible: bool) -> Wakeup {
        self.block(&self.current(), interruptible)
    }

    /// [`block_current`](Self::block_current) for a caller that already looked itself
    /// up.
    pub(crate) fn block(&self, thread: &Thread, interruptible: bool) -> Wakeup {
        loop {
            match thread.state() {
                State::FutexWaiting => {}
                State::Runnable => return Wakeup::Woken,
                other => panic!("thread {} blocked in state {:?}", thread, other),
            }

            if interruptible && thread.signal_pending() {
                // Losing this race means a waker got there first.
                return if self.set_thread_state(thread, State::Runnable, true) {
                    Wakeup::Interrupted
                } else {
                    Wakeup::Woken
                };
            }

            interrupts::without(|g| self.switch_from(thread, g));
        }
    }

    /// Suspend the current context until something dispatches it. May return
    /// spuriously; callers re-check their state.
    pub fn switch(&self, g: &WithoutInterrupts) {
        let thread = self.current_with(g);
        self.switch_from(&thread, g);
    }

    fn switch_from(&self, thread: &Thread, g: &WithoutInterrupts) {
        assert_ne!(
            thread.state(),
            State::Dead,
            "dead thread {} tried to switch away",
            thread
        );
        unsafe { thread.context().suspend() };

        // Other threads may have run on this hardware thread in the meantime.
        self.current.lock(g).insert(hw_thread_id(), thread.clone());
    }

    /// Hand the CPU to `thread`.
    ///
    /// # Panics
    /// If `thread` is dead or was never made runnable.
    pub fn switch_to(&self, thread: &Thread, _g: &WithoutInterrupts) {
        match thread.state() {
            State::Dead => panic!("switch to dead thread {}", thread),
            State::None => panic!("switch to thread {} that never started", thread),
            State::Runnable | State::FutexWaiting => thread.context().resume(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_per_hardware_thread() {
        let scheduler = Scheduler::new();
        let a = scheduler.current();
        let b = scheduler.current();
        assert_eq!(a, b);
        assert_eq!(a.state(), State::Runnable);

        let other = std::thread::spawn(move || Scheduler::new().current().id())
            .join()
            .unwrap();
        assert_ne!(other, a.id());
    }

    #[test]
    fn wake_only_ignores_threads_that_are_not_waiting() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        assert!(!scheduler.set_thread_state(&thread, State::Runnable, true));
        assert_eq!(scheduler.get_thread_state(&thread), State::Runnable);
    }

    #[test]
    fn wait_then_wake_round_trip() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        assert!(scheduler.set_thread_state(&thread, State::FutexWaiting, false));
        assert!(scheduler.set_thread_state(&thread, State::Runnable, true));
        assert_eq!(scheduler.block_current(false), Wakeup::Woken);
    }

    #[test]
    fn pending_signal_interrupts_block() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        thread.send_signal();
        scheduler.set_thread_state(&thread, State::FutexWaiting, false);
        assert_eq!(scheduler.block_current(true), Wakeup::Interrupted);
        assert_eq!(thread.state(), State::Runnable);
        assert!(thread.take_signal());
    }

    #[test]
    fn resumed_thread_reclaims_its_hardware_thread() {
        let scheduler = Scheduler::new();
        let me = scheduler.current();

        // Another thread ran here while `me` was switched out.
        let other = Thread::bootstrap(hw_thread_id());
        scheduler.install_current(other.clone());
        assert_eq!(scheduler.current(), other);

        me.context().resume();
        interrupts::without(|g| scheduler.switch_from(&me, g));
        assert_eq!(scheduler.current(), me);
    }

    #[test]
    fn wake_only_transition_applies_once() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        scheduler.set_thread_state(&thread, State::FutexWaiting, false);
        assert!(scheduler.transition(&thread, State::Runnable, true));
        assert!(!scheduler.transition(&thread, State::Runnable, true));
        assert_eq!(thread.state(), State::Runnable);
    }

    #[test]
    #[should_panic(expected = "invalid state transition")]
    fn invalid_transition_panics() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        scheduler.set_thread_state(&thread, State::None, false);
    }

    #[test]
    #[should_panic(expected = "switch to dead thread")]
    fn switching_to_a_dead_thread_panics() {
        let scheduler = Scheduler::new();
        let thread = scheduler.current();
        scheduler.set_thread_state(&thread, State::Dead, false);
        interrupts::without(|g| scheduler.switch_to(&thread, g));
    }
}
