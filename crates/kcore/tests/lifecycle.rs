use std::{
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
};

use kcore::{
    error::KernErrorKind,
    sync::kutex,
    task::{self, Process, State},
};

#[test]
fn exactly_one_thread_runs_the_last_exit_hooks() {
    const THREADS: usize = 12;

    for _ in 0..8 {
        let process = Process::new("lifecycle-last");
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        {
            let runs = runs.clone();
            process.on_last_thread_exit(move |p| {
                runs.fetch_add(1, Ordering::SeqCst);
                tx.send((task::current().id(), p.threads_not_exiting()))
                    .unwrap();
            });
        }

        let gate = Arc::new(AtomicU32::new(0));
        let threads: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = gate.clone();
                task::spawn(&process, move || {
                    while gate.load(Ordering::Acquire) == 0 {
                        kutex::wait(&gate, 0, false);
                    }
                })
                .unwrap()
            })
            .collect();

        gate.store(1, Ordering::Release);
        kutex::wake_all(&*gate);
        process.wait_teardown();

        let (runner, remaining) = rx.recv().unwrap();
        assert_eq!(remaining, 0);
        assert!(threads.iter().any(|t| t.id() == runner));

        for thread in &threads {
            thread.join();
            assert_eq!(thread.state(), State::Dead);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(process.thread_count(), 0);
    }
}

#[test]
fn exited_process_refuses_new_threads() {
    let process = Process::new("lifecycle-closed");
    let only = task::spawn(&process, || {}).unwrap();
    only.join();

    assert!(process.is_exiting());
    assert!(process.is_torn_down());
    let err = task::spawn(&process, || {}).unwrap_err();
    assert_eq!(err.kind(), KernErrorKind::ProcessExiting);
}

#[test]
fn exit_request_unwinds_interruptible_waits() {
    const THREADS: usize = 3;
    let process = Process::new("lifecycle-request");
    let word = Arc::new(AtomicU32::new(0));
    let interrupted = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let word = word.clone();
            let interrupted = interrupted.clone();
            task::spawn(&process, move || {
                if !kutex::wait(&word, 0, true) {
                    interrupted.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap()
        })
        .collect();

    while kutex::waiters(&*word) != THREADS {
        thread::yield_now();
    }
    assert!(process.request_exit(1));
    process.wait_teardown();
    for thread in &threads {
        thread.join();
        assert!(thread.signal_pending());
    }

    assert_eq!(interrupted.load(Ordering::SeqCst), THREADS);
    assert_eq!(process.exit_status(), Some(1));
    assert_eq!(kutex::waiters(&*word), 0);
}

#[test]
fn threads_outlive_their_spawner() {
    let process = Process::new("lifecycle-nested");
    let (tx, rx) = mpsc::channel();

    let parent = {
        let process = process.clone();
        task::spawn(&process.clone(), move || {
            let child = task::spawn(&process, || {}).unwrap();
            tx.send(child).unwrap();
        })
        .unwrap()
    };

    let child = rx.recv().unwrap();
    parent.join();
    child.join();
    assert_eq!(process.thread_count(), 0);
}
