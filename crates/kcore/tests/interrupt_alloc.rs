use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use hal::interrupts;
use kcore::{config::KernelConfig, task::WorkItem};
use log::LevelFilter;

/// Counts allocations made by threads that opted in.
struct CountingAlloc;

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if COUNTING.try_with(Cell::get).unwrap_or(false) {
            ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn allocations_in<F: FnOnce()>(f: F) -> usize {
    let before = ALLOCATIONS.load(Ordering::SeqCst);
    COUNTING.with(|c| c.set(true));
    f();
    COUNTING.with(|c| c.set(false));
    ALLOCATIONS.load(Ordering::SeqCst) - before
}

// Boots with every trace event enabled, so this needs its own binary.
#[test]
fn schedule_work_does_not_allocate_with_tracing_on() {
    let config = KernelConfig::builder()
        .log_level(LevelFilter::Trace)
        .color(false)
        .build()
        .unwrap();
    let kernel = kcore::boot(config).unwrap();
    let worker = kernel.worker();
    let ran = Arc::new(AtomicUsize::new(0));

    for round in 1..=4 {
        let r = ran.clone();
        let item = WorkItem::new("count", move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let allocations =
            allocations_in(|| interrupts::without(|g| worker.schedule_work(item, g)));
        // The first round registers callsites and sets up the console.
        if round > 1 {
            assert_eq!(allocations, 0, "schedule_work allocated in round {round}");
        }

        while ran.load(Ordering::SeqCst) != round {
            thread::yield_now();
        }
    }
}
