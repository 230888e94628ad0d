use core::fmt::{self, Write};
use std::sync::{Arc, Mutex as StdMutex};

use kcore::{config::KernelConfig, error::KernErrorKind, stdio};
use log::LevelFilter;

#[derive(Clone, Default)]
struct Capture(Arc<StdMutex<String>>);

impl Write for Capture {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.lock().unwrap().push_str(s);
        Ok(())
    }
}

// Booting is once per address space, so everything lives in one test.
#[test]
fn boot_installs_the_kernel_once() {
    let config = KernelConfig::builder()
        .wait_buckets(16)
        .log_level(LevelFilter::Debug)
        .color(false)
        .worker_name("boot-worker")
        .build()
        .unwrap();

    let kernel = kcore::boot(config.clone()).unwrap();
    assert_eq!(kernel.config().wait_buckets(), 16);
    assert!(std::ptr::eq(kernel, kcore::kernel()));

    let worker = kernel.worker();
    assert_eq!(worker.name(), "boot-worker");
    let worker_thread = worker.thread().expect("worker thread started at boot");
    assert_eq!(worker_thread.name(), Some("boot-worker"));
    assert!(kernel
        .kernel_process()
        .threads()
        .iter()
        .any(|t| t == worker_thread));

    let err = kcore::boot(config.clone()).unwrap_err();
    assert_eq!(err.kind(), KernErrorKind::AlreadyBooted);
    assert_eq!(
        stdio::init(&config).unwrap_err().kind(),
        KernErrorKind::LoggerInstalled
    );

    let capture = Capture::default();
    stdio::stdout()
        .lock(|w| w.register_additional_writer(capture.clone()))
        .unwrap();

    log::info!("hello from boot");
    log::trace!("filtered out");
    tracing::debug!(answer = 42, "traced");
    tracing::trace!("also filtered out");

    let output = capture.0.lock().unwrap().clone();
    assert!(output.contains("[INFO boot cpu="), "{output}");
    assert!(output.contains("] hello from boot\n"), "{output}");
    let traced = output
        .lines()
        .find(|line| line.starts_with("DEBUG") && line.contains("traced"))
        .unwrap_or_else(|| panic!("no traced event in {output}"));
    assert!(traced.contains(" answer=42"), "{traced}");
    assert!(!output.contains("filtered out"), "{output}");
}
