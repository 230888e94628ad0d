//! Deferred work queued from interrupt context.
//!
//! Interrupt handlers cannot block, allocate or take sleeping locks, so anything
//! heavier than flipping a bit is packaged as a [`WorkItem`] and handed to the
//! [`InterruptWorker`], a kernel thread that runs items one at a time in the order
//! they were queued. Queueing itself only needs interrupts to be disabled.

use alloc::{boxed::Box, sync::Arc};
use core::{
    fmt::Debug,
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use hal::{
    interrupts::{self, SpinLock, WithoutInterrupts},
    task::hw_thread_id,
    time::timestamp,
};
use spin::Once;
use tracing::trace;

use super::{process::Process, thread::Builder, Thread};
use crate::{error::KernResult, kernel::instance, sync::kutex};

type Handler = Box<dyn FnOnce() + Send>;

pub struct WorkItem {
    next: Option<Box<WorkItem>>,
    name: &'static str,
    handler: Option<Handler>,
}

impl WorkItem {
    /// Allocate a work item. Do this before entering interrupt context; queueing a
    /// prepared item does not allocate.
    pub fn new<F>(name: &'static str, f: F) -> Box<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Box::new(Self {
            next: None,
            name,
            handler: Some(Box::new(f)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkItem")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Singly linked FIFO of owned work items with O(1) append.
struct WorkList {
    head: Option<Box<WorkItem>>,
    tail: Option<NonNull<WorkItem>>,
    len: usize,
}

// `tail` only ever points into the chain owned by `head`.
unsafe impl Send for WorkList {}

impl WorkList {
    const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn push_back(&mut self, mut item: Box<WorkItem>) {
        item.next = None;
        let ptr = NonNull::from(&mut *item);
        match self.tail {
            Some(mut tail) => unsafe { tail.as_mut().next = Some(item) },
            None => self.head = Some(item),
        }
        self.tail = Some(ptr);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<Box<WorkItem>> {
        let mut head = self.head.take()?;
        self.head = head.next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    fn take(&mut self) -> WorkList {
        mem::replace(self, WorkList::new())
    }
}

impl Drop for WorkList {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

pub struct InterruptWorker {
    name: &'static str,
    pending: SpinLock<WorkList>,
    /// 1 while the worker is (about to be) parked with nothing to do.
    idle: AtomicU32,
    stop: AtomicBool,
    dispatched: AtomicU64,
    thread: Once<Thread>,
}

impl InterruptWorker {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            pending: SpinLock::new(WorkList::new()),
            idle: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
            thread: Once::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The kernel thread draining this worker, once [`spawn`](Self::spawn)ed.
    pub fn thread(&self) -> Option<&Thread> {
        self.thread.get()
    }

    /// Total number of items run so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Number of items queued and not yet picked up.
    pub fn pending(&self) -> usize {
        interrupts::without(|g| self.pending.lock(g).len)
    }

    /// Start the thread that drains this worker, as a member of `process`.
    pub fn spawn(self: &Arc<Self>, process: &Arc<Process>) -> KernResult<Thread> {
        let worker = self.clone();
        let thread = Builder::new()
            .name(self.name)
            .spawn(process, move || worker.run())?;
        Ok(self.thread.call_once(|| thread).clone())
    }

    /// Queue `item`. Callable from interrupt handlers.
    pub fn schedule_work(&self, item: Box<WorkItem>, g: &WithoutInterrupts) {
        trace!(work = item.name, "schedule");
        self.pending.lock(g).push_back(item);
        if self.idle.swap(0, Ordering::SeqCst) == 1 {
            kutex::wake(&self.idle, 1);
        }
    }

    /// Ask the worker thread to finish once the queue is empty.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.idle.store(0, Ordering::SeqCst);
        kutex::wake(&self.idle, kutex::WAKE_ALL);
    }

    fn run(&self) {
        loop {
            let batch = interrupts::without(|g| {
                let mut pending = self.pending.lock(g);
                let batch = pending.take();
                if batch.is_empty() {
                    self.idle.store(1, Ordering::SeqCst);
                }
                batch
            });

            if batch.is_empty() {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                kutex::wait(&self.idle, 1, false);
                continue;
            }

            self.dispatch(batch);
        }
        trace!(worker = self.name, "stopped");
    }

    fn dispatch(&self, mut batch: WorkList) {
        let entropy = &instance().entropy;
        while let Some(mut item) = batch.pop_front() {
            let seq = self.dispatched.fetch_add(1, Ordering::Relaxed);
            entropy.mix_event(
                item.name.as_bytes(),
                &[seq, timestamp(), hw_thread_id() as u64],
            );
            trace!(work = item.name, seq, "dispatch");
            if let Some(handler) = item.handler.take() {
                handler();
            }
        }
    }
}

impl Debug for InterruptWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptWorker")
            .field("name", &self.name)
            .field("dispatched", &self.dispatched())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use std::sync::Mutex;

    use super::*;

    fn names(list: &mut WorkList) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Some(item) = list.pop_front() {
            names.push(item.name);
        }
        names
    }

    #[test]
    fn work_list_is_fifo() {
        let mut list = WorkList::new();
        for name in ["a", "b", "c"] {
            list.push_back(WorkItem::new(name, || {}));
        }
        assert_eq!(list.len, 3);
        assert_eq!(names(&mut list), ["a", "b", "c"]);
        assert!(list.is_empty());
        assert!(list.tail.is_none());

        list.push_back(WorkItem::new("d", || {}));
        assert_eq!(names(&mut list), ["d"]);
    }

    #[test]
    fn take_leaves_an_empty_list() {
        let mut list = WorkList::new();
        list.push_back(WorkItem::new("a", || {}));
        let mut taken = list.take();
        assert!(list.is_empty());
        list.push_back(WorkItem::new("b", || {}));
        assert_eq!(names(&mut taken), ["a"]);
        assert_eq!(names(&mut list), ["b"]);
    }

    #[test]
    fn dropping_a_list_drops_unrun_handlers() {
        let flag = Arc::new(());
        let mut list = WorkList::new();
        for _ in 0..1000 {
            let flag = flag.clone();
            list.push_back(WorkItem::new("held", move || drop(flag)));
        }
        drop(list);
        assert_eq!(Arc::strong_count(&flag), 1);
    }

    #[test]
    fn private_worker_drains_in_order_and_stops() {
        let process = Process::new("worker-test");
        let worker = InterruptWorker::new("test-worker");
        let log = Arc::new(Mutex::new(Vec::new()));

        let items: Vec<_> = (0..16)
            .map(|i| {
                let log = log.clone();
                WorkItem::new("record", move || log.lock().unwrap().push(i))
            })
            .collect();
        interrupts::without(|g| {
            for item in items {
                worker.schedule_work(item, g);
            }
        });

        let thread = worker.spawn(&process).unwrap();
        assert_eq!(worker.thread(), Some(&thread));
        worker.shutdown();
        thread.join();

        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
        assert_eq!(worker.dispatched(), 16);
        assert_eq!(worker.pending(), 0);
    }
}
