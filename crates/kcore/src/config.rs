use log::LevelFilter;

use crate::error::{KernErrorKind, KernResult};

/// Boot-time tunables of the concurrency core.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    wait_buckets: usize,
    mutex_spin: u32,
    log_level: LevelFilter,
    color: bool,
    worker_name: &'static str,
}

impl KernelConfig {
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Number of hash buckets in the kutex wait table. Always a power of two.
    pub fn wait_buckets(&self) -> usize {
        self.wait_buckets
    }

    /// How many times a contended mutex spins before it parks.
    pub fn mutex_spin(&self) -> u32 {
        self.mutex_spin
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn color(&self) -> bool {
        self.color
    }

    pub fn worker_name(&self) -> &'static str {
        self.worker_name
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            wait_buckets: 64,
            mutex_spin: 100,
            log_level: LevelFilter::Info,
            color: true,
            worker_name: "irq-worker",
        }
    }
}

#[derive(Debug)]
pub struct Builder {
    config: KernelConfig,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
        }
    }

    pub fn wait_buckets(mut self, buckets: usize) -> Self {
        self.config.wait_buckets = buckets;
        self
    }

    pub fn mutex_spin(mut self, spins: u32) -> Self {
        self.config.mutex_spin = spins;
        self
    }

    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.config.color = color;
        self
    }

    pub fn worker_name(mut self, name: &'static str) -> Self {
        self.config.worker_name = name;
        self
    }

    pub fn build(self) -> KernResult<KernelConfig> {
        let config = self.config;
        if !config.wait_buckets.is_power_of_two() || config.worker_name.is_empty() {
            return Err(KernErrorKind::InvalidConfig.into());
        }
        Ok(config)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
