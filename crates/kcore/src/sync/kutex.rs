//! Kernel-level futexes ("kutexes"): an address-keyed sleep/wake queue.
//!
//! This is the only primitive that actually suspends a thread. Mutexes, condition
//! variables, thread join and the interrupt worker's idle park are all built on it.

use alloc::{boxed::Box, vec::Vec};
use core::{
    hash::{BuildHasher, Hash, Hasher},
    sync::atomic::{AtomicU32, Ordering},
};

use ahash::RandomState;
use hal::interrupts::{self, SpinLock};
use tracing::trace;

use super::wait_list::WaitList;
use crate::{
    kernel::instance,
    task::{State, Thread, Wakeup},
};

/// Wake every waiter on an address.
pub const WAKE_ALL: usize = usize::MAX;

/// Threads made runnable per pass over a bucket.
const WAKE_BATCH: usize = 8;

/// Sleep while `*atomic == value`. See [`WaitTable::wait`].
pub fn wait(atomic: &AtomicU32, value: u32, interruptible: bool) -> bool {
    instance().waits().wait(atomic, value, interruptible)
}

/// Wake up to `count` waiters on `atomic`. See [`WaitTable::wake`].
pub fn wake(atomic: *const AtomicU32, count: usize) -> usize {
    instance().waits().wake(atomic, count)
}

pub fn wake_one(atomic: *const AtomicU32) -> bool {
    wake(atomic, 1) == 1
}

pub fn wake_all(atomic: *const AtomicU32) -> usize {
    wake(atomic, WAKE_ALL)
}

/// Number of threads currently parked on `atomic`.
pub fn waiters(atomic: *const AtomicU32) -> usize {
    instance().waits().waiters(atomic)
}

/// The hashed table of wait lists behind [`wait`] and [`wake`].
#[derive(Debug)]
pub struct WaitTable {
    buckets: Box<[Bucket]>,
    hash_builder: RandomState,
    mask: u64,
}

impl WaitTable {
    /// `num_buckets` must be a power of two.
    pub fn new(num_buckets: usize, hash_builder: RandomState) -> Self {
        assert!(
            num_buckets.is_power_of_two(),
            "wait table size must be a power of two"
        );

        let mut buckets = Vec::with_capacity(num_buckets);
        buckets.resize_with(num_buckets, Default::default);
        let buckets = buckets.into_boxed_slice();

        Self {
            buckets,
            hash_builder,
            mask: (num_buckets as u64 - 1),
        }
    }

    fn bucket(&self, key: WaitKey) -> &Bucket {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        let hash = hasher.finish();
        let bucket = hash & self.mask;
        &self.buckets[bucket as usize]
    }

    /// Park the current thread on `atomic` as long as it still holds `value`.
    ///
    /// The value check and the registration happen together under the bucket lock, so
    /// a waker that changes the value and then calls [`wake`](Self::wake) can never slip
    /// in between: either the check sees the new value and this returns at once, or the
    /// waker finds the entry.
    ///
    /// Returns `false` only if an interruptible wait was abandoned because a signal is
    /// pending and no wake reached it. A wake that races with the signal still counts.
    pub fn wait(&self, atomic: &AtomicU32, value: u32, interruptible: bool) -> bool {
        let key = WaitKey::from_atomic(atomic);
        let bucket = self.bucket(key);
        let scheduler = &instance().scheduler;
        let thread = scheduler.current();

        let handle = interrupts::without(|g| {
            let mut waiters = bucket.waiters.lock(g);
            if atomic.load(Ordering::Acquire) != value {
                return None;
            }

            scheduler.set_thread_state(&thread, State::FutexWaiting, false);
            thread.set_wait_address(Some(key.0));
            Some(waiters.push_back(Waiter {
                key,
                thread: thread.clone(),
                woken: false,
            }))
        });

        let Some(handle) = handle else {
            trace!("kutex.wait({:?}) value changed", key);
            return true;
        };

        trace!("kutex.wait({:?}) {}", key, thread);
        let wakeup = scheduler.block(&thread, interruptible);

        // The waker normally unlinked us already; removing is then only a free.
        let woken = interrupts::without(|g| {
            let waiter = bucket.waiters.lock(g).remove(handle);
            thread.set_wait_address(None);
            waiter.map_or(false, |waiter| waiter.woken)
        });

        woken || wakeup == Wakeup::Woken
    }

    /// Wake up to `count` threads parked on `atomic`, oldest first. Returns how many
    /// were woken.
    ///
    /// Does not allocate, so interrupt handlers may call it. Woken threads are
    /// dispatched in batches after the bucket lock is released.
    pub fn wake(&self, atomic: *const AtomicU32, count: usize) -> usize {
        let key = WaitKey::from_atomic(atomic);
        let bucket = self.bucket(key);
        let scheduler = &instance().scheduler;
        let mut woken = 0;

        while woken < count {
            let limit = (count - woken).min(WAKE_BATCH);
            let mut batch: [Option<Thread>; WAKE_BATCH] = Default::default();
            let mut runnable = 0;

            let unlinked = interrupts::without(|g| {
                bucket.waiters.lock(g).unlink_where(
                    limit,
                    |waiter| waiter.key == key,
                    |waiter| {
                        waiter.woken = true;
                        if scheduler.transition(&waiter.thread, State::Runnable, true) {
                            batch[runnable] = Some(waiter.thread.clone());
                            runnable += 1;
                        }
                    },
                )
            });

            for thread in batch.iter().flatten() {
                scheduler.dispatch(thread);
            }
            woken += unlinked;
            if unlinked < limit {
                break;
            }
        }

        trace!("kutex.wake({:?}, {}) = {}", key, count, woken);
        woken
    }

    pub fn waiters(&self, atomic: *const AtomicU32) -> usize {
        let key = WaitKey::from_atomic(atomic);
        let bucket = self.bucket(key);
        interrupts::without(|g| {
            bucket
                .waiters
                .lock(g)
                .iter()
                .filter(|waiter| waiter.key == key)
                .count()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct WaitKey(usize);

impl WaitKey {
    fn from_atomic(atomic: *const AtomicU32) -> Self {
        Self(atomic as usize)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    waiters: SpinLock<WaitList<Waiter>>,
}

#[derive(Debug)]
struct Waiter {
    key: WaitKey,
    thread: Thread,
    woken: bool,
}
