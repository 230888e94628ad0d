use entropy::Blake2bPool;
use hal::{
    interrupts::{self, SpinLock},
    task::hw_thread_id,
    time::timestamp,
};
use rand_core::{RngCore, SeedableRng};

/// The kernel's entropy pool.
///
/// Fed from timing of kernel events (every interrupt-worker dispatch mixes one in) and
/// drained to seed RNGs such as the kutex table hasher.
#[derive(Debug)]
pub struct EntropyPool {
    pool: SpinLock<Blake2bPool>,
}

impl EntropyPool {
    pub fn new() -> Self {
        let mut pool = Blake2bPool::empty();
        pool.mix_event(b"boot", &[timestamp(), hw_thread_id() as u64]);
        Self {
            pool: SpinLock::new(pool),
        }
    }

    pub fn write_entropy(&self, bytes: &[u8]) {
        interrupts::without(|g| self.pool.lock(g).mix(bytes));
    }

    /// Mix in a tagged event. Cheap enough to do from interrupt context.
    pub fn mix_event(&self, tag: &[u8], words: &[u64]) {
        interrupts::without(|g| self.pool.lock(g).mix_event(tag, words));
    }

    pub fn get_entropy(&self, buf: &mut [u8]) {
        interrupts::without(|g| self.pool.lock(g).extract(buf));
    }

    /// Seed a fresh `R`. With `remix`, output of the new RNG is fed back into the pool
    /// so that later seeds do not depend only on what was mixed in so far.
    pub fn seeded<R>(&self, remix: bool) -> R
    where
        R: SeedableRng + RngCore,
    {
        let mut seed = R::Seed::default();
        self.get_entropy(seed.as_mut());

        let mut rng = R::from_seed(seed);

        if remix {
            let mut temp = [0; 32];
            rng.fill_bytes(&mut temp);
            self.write_entropy(&temp);
        }
        self.mix_event(b"seeded", &[timestamp()]);

        rng
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}
