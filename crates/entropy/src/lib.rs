#![cfg_attr(not(test), no_std)]

use blake2::{Blake2b512, Blake2s256, Digest};
use rand_core::{RngCore, SeedableRng};

pub type Blake2sPool = Pool<Blake2s256>;
pub type Blake2bPool = Pool<Blake2b512>;

/// A pool for accumulating randomness based on a cryptographic hash function.
///
/// # Usage
///
/// ```
/// use entropy::Blake2bPool;
/// use rand_chacha::ChaCha20Rng;
/// use rand_core::RngCore;
///
/// let mut pool = Blake2bPool::empty();
/// pool.mix(b"some randomness... ooohhhh randommmmm");
///
/// // Create a new RNG using randomness from the pool. This also mixes randomness
/// // from the RNG back into the pool.
/// let mut rng: ChaCha20Rng = pool.seeded();
///
/// let _random_u32 = rng.next_u32();
/// ```
///
/// # Security
///
/// Once the pool has reached a threshold of having enough entropy to fully seed a CRNG,
/// the pool will never run out of entropy.
///
/// This pool does not keep track of available entropy, as entropy estimation is more
/// or less black magic and generally shouldn't be relied upon. Instead, the pool should
/// be used in ways such that attackers cannot learn information about other pool users
/// from their own pool. This typically involves having per user or per process pools.
///
/// ## Low Entropy Behavior
///
/// Event timings (interrupt dispatches, context switches) are cheap to collect but
/// individually worth very little. Mix them anyway with [`Pool::mix_event`]; the pool
/// never loses entropy by mixing predictable data.
#[derive(Debug, Clone)]
pub struct Pool<D> {
    hash: D,
}

impl<D> Pool<D>
where
    D: Digest + Clone,
{
    /// Create a new empty pool.
    pub fn empty() -> Self {
        Pool { hash: D::new() }
    }

    /// Mix in some data.
    ///
    /// Even if the data is not random, the overall entropy of the pool will not
    /// diminish.
    pub fn mix(&mut self, data: &[u8]) {
        self.hash.update(data);
    }

    /// Mix in an event: a tag naming its source followed by machine words describing it
    /// (timestamps, counters, identifiers).
    ///
    /// The tag is length-prefixed so `("ab", [1])` and `("a", [..])` never collide.
    pub fn mix_event(&mut self, tag: &[u8], words: &[u64]) {
        self.hash.update((tag.len() as u64).to_le_bytes());
        self.hash.update(tag);
        for word in words {
            self.hash.update(word.to_le_bytes());
        }
    }

    /// Drain entropy from the pool
    pub fn extract(&mut self, mut buf: &mut [u8]) {
        let output_size = <D as Digest>::output_size();
        let block_size = output_size / 2;

        while block_size <= buf.len() {
            let out = self.hash.clone().finalize();
            let (block, remix) = out.split_at(block_size);
            buf[..block_size].copy_from_slice(block);
            buf = &mut buf[block_size..];
            self.mix(remix);
        }

        if !buf.is_empty() {
            let out = self.hash.clone().finalize();
            let (block, rest) = out.split_at(buf.len());
            buf.copy_from_slice(block);
            self.mix(rest);
        }
    }

    /// Create an RNG seeded with randomness from the pool.
    /// This method will also mix some randomness from the RNG back into the pool.
    /// This is secure even without the use of a CRNG because no matter how non-random
    /// the generated data is, the overall pool entropy will not decrease. In other words,
    /// a CRNG will refill the pool, a non-CRNG won't make things any worse.
    pub fn seeded<R>(&mut self) -> R
    where
        R: SeedableRng + RngCore,
    {
        let mut seed = R::Seed::default();
        self.extract(seed.as_mut());
        let mut rng = R::from_seed(seed);

        let mut remix = R::Seed::default();
        if rng.try_fill_bytes(remix.as_mut()).is_ok() {
            self.mix(remix.as_mut());
        }

        rng
    }
}

impl<D> Default for Pool<D>
where
    D: Digest + Clone,
{
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn sample(pool: &mut Blake2bPool, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        pool.extract(&mut buf);
        buf
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let mut a = Blake2bPool::empty();
        let mut b = Blake2bPool::empty();
        a.mix(b"boot");
        b.mix(b"boot");
        assert_eq!(sample(&mut a, 48), sample(&mut b, 48));
    }

    #[test]
    fn extraction_advances_the_pool() {
        let mut pool = Blake2bPool::empty();
        pool.mix(b"boot");
        let first = sample(&mut pool, 16);
        let second = sample(&mut pool, 16);
        assert_ne!(first, second);
    }

    #[test]
    fn long_extraction_has_no_repeated_blocks() {
        let mut pool = Blake2sPool::empty();
        pool.mix(b"boot");
        let mut buf = [0u8; 64];
        pool.extract(&mut buf);
        assert_ne!(buf[..16], buf[16..32]);
        assert_ne!(buf[16..32], buf[32..48]);
    }

    #[test]
    fn event_tags_are_length_prefixed() {
        let mut a = Blake2bPool::empty();
        let mut b = Blake2bPool::empty();
        a.mix_event(b"ab", &[1]);
        b.mix_event(b"a", &[u64::from_le_bytes(*b"b\0\0\0\0\0\0\0"), 1]);
        assert_ne!(sample(&mut a, 32), sample(&mut b, 32));
    }

    #[test]
    fn seeded_rngs_differ_between_calls() {
        let mut pool = Blake2bPool::empty();
        pool.mix_event(b"irq", &[7, 42]);
        let mut first: ChaCha20Rng = pool.seeded();
        let mut second: ChaCha20Rng = pool.seeded();
        assert_ne!(first.next_u64(), second.next_u64());
    }
}
