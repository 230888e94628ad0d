use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use log::{error, info};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use spin::Once;

use crate::{
    config::KernelConfig,
    error::{KernErrorKind, KernResult},
    random::EntropyPool,
    stdio,
    sync::kutex::WaitTable,
    task::{InterruptWorker, Process, Scheduler},
};

/// Kernel-wide state of the concurrency core.
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    pub(crate) scheduler: Scheduler,
    waits: WaitTable,
    pub(crate) entropy: EntropyPool,
    worker: Arc<InterruptWorker>,
    worker_started: AtomicBool,
    kernel_process: Arc<Process>,
}

static KERNEL: Once<Kernel> = Once::new();

impl Kernel {
    fn new(config: KernelConfig) -> Self {
        let entropy = EntropyPool::new();
        let mut rng: ChaCha20Rng = entropy.seeded(true);
        let hash_builder = RandomState::with_seeds(
            rng.next_u64(),
            rng.next_u64(),
            rng.next_u64(),
            rng.next_u64(),
        );

        Self {
            scheduler: Scheduler::new(),
            waits: WaitTable::new(config.wait_buckets(), hash_builder),
            entropy,
            worker: InterruptWorker::new(config.worker_name()),
            worker_started: AtomicBool::new(false),
            kernel_process: Process::new("kernel"),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn waits(&self) -> &WaitTable {
        &self.waits
    }

    pub fn worker(&self) -> &Arc<InterruptWorker> {
        &self.worker
    }

    /// The process kernel-internal threads (such as the interrupt worker) belong to.
    pub fn kernel_process(&self) -> &Arc<Process> {
        &self.kernel_process
    }

    pub fn get_entropy(&self, buf: &mut [u8]) {
        self.entropy.get_entropy(buf);
    }

    pub fn write_entropy(&self, bytes: &[u8]) {
        self.entropy.write_entropy(bytes);
    }

    fn start_worker(&self) {
        if self
            .worker_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match self.worker.spawn(&self.kernel_process) {
            Ok(thread) => info!("interrupt worker running as {}", thread),
            Err(err) => {
                error!("failed to start interrupt worker: {}", err);
                self.worker_started.store(false, Ordering::Release);
            }
        }
    }
}

/// Bring up the kernel with `config` and install its logger.
///
/// Fails with [`KernErrorKind::AlreadyBooted`] if the kernel is already up, including
/// when it was brought up implicitly with defaults by an earlier call into the crate.
pub fn boot(config: KernelConfig) -> KernResult<&'static Kernel> {
    let mut config = Some(config);
    let mut booted = false;
    let kernel = KERNEL.call_once(|| {
        booted = true;
        Kernel::new(config.take().unwrap_or_default())
    });
    if !booted {
        return Err(KernErrorKind::AlreadyBooted.into());
    }

    stdio::init(kernel.config())?;
    info!(
        "kcore v{} up: {} wait buckets",
        env!("CARGO_PKG_VERSION"),
        kernel.config().wait_buckets()
    );
    kernel.start_worker();
    Ok(kernel)
}

/// The running kernel, with its interrupt worker started.
pub fn kernel() -> &'static Kernel {
    let kernel = instance();
    kernel.start_worker();
    kernel
}

/// The kernel state, brought up with defaults if nobody booted it yet. Does not start
/// the interrupt worker.
pub(crate) fn instance() -> &'static Kernel {
    KERNEL.call_once(|| Kernel::new(KernelConfig::default()))
}
