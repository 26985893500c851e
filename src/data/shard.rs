use std::num::NonZeroUsize;
use std::ops::Range;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::config::WorldContext;
use crate::error::Result;

/// Splits `total` samples among `world_size` participants and returns the shard for `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition).
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(world_size > 0);
    assert!(rank < world_size);

    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = if rank < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Shard specification for a participant.
///
/// The rank is always inside the world, so `range` never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    rank: usize,
    world_size: NonZeroUsize,
}

impl ShardSpec {
    /// Creates a new `ShardSpec`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the world is empty or `rank` is outside it.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        let ctx = WorldContext::new(rank, world_size)?;
        Ok(Self::from(&ctx))
    }

    #[inline]
    pub fn rank(self) -> usize {
        self.rank
    }

    #[inline]
    pub fn world_size(self) -> usize {
        self.world_size.get()
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size.get())
    }
}

impl From<&WorldContext> for ShardSpec {
    fn from(ctx: &WorldContext) -> Self {
        // WorldContext guarantees a non-empty world.
        let world_size = NonZeroUsize::new(ctx.world_size()).unwrap_or(NonZeroUsize::MIN);
        Self {
            rank: ctx.rank(),
            world_size,
        }
    }
}

/// Assigns each participant its share of the dataset indices for an epoch.
///
/// Membership is fixed for the whole run. With `shuffle`, the order inside the
/// shard is permuted once per epoch using a generator derived from the shared
/// seed, so every participant follows the same scheme. With `drop_last`, the
/// tail that can't be spread evenly is dropped so that all shards are equal.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    shard: ShardSpec,
    total: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl DistributedSampler {
    /// Creates a new sampler.
    ///
    /// # Args
    /// * `shard` - The participant being sampled for.
    /// * `len` - The dataset's length.
    /// * `shuffle` - Whether to permute the shard every epoch.
    /// * `drop_last` - Whether to truncate the dataset to a multiple of the world size.
    /// * `seed` - The seed shared by every participant.
    pub fn new(shard: ShardSpec, len: usize, shuffle: bool, drop_last: bool, seed: u64) -> Self {
        let world_size = shard.world_size.get();
        let total = if drop_last {
            len - len % world_size
        } else {
            len
        };

        Self {
            shard,
            total,
            shuffle,
            seed,
            epoch: 0,
        }
    }

    #[inline]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sets the epoch used to derive the next permutation.
    #[inline]
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// The dataset indices owned by this participant.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.shard.range(self.total)
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.range().len()
    }

    /// Returns the indices to visit in the current epoch, in visiting order.
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.range().collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            indices.shuffle(&mut rng);
        }

        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rank: usize, world_size: usize) -> ShardSpec {
        ShardSpec::from(&WorldContext::new(rank, world_size).unwrap())
    }

    #[test]
    fn shard_range_balanced() {
        // total 10, participants 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shard_range_fewer_samples_than_participants() {
        assert_eq!(shard_range(2, 0, 4), 0..1);
        assert_eq!(shard_range(2, 1, 4), 1..2);
        assert_eq!(shard_range(2, 2, 4), 2..2);
        assert_eq!(shard_range(2, 3, 4), 2..2);
    }

    #[test]
    fn shard_spec_range_matches_function() {
        assert_eq!(spec(1, 3).range(10), 4..7);
        assert_eq!(ShardSpec::new(1, 3).unwrap(), spec(1, 3));
    }

    #[test]
    fn shard_spec_rejects_rank_outside_world() {
        assert!(ShardSpec::new(5, 2).unwrap_err().is_config());
        assert!(ShardSpec::new(0, 0).unwrap_err().is_config());

        let spec = ShardSpec::new(1, 2).unwrap();
        assert_eq!((spec.rank(), spec.world_size()), (1, 2));
    }

    #[test]
    fn sampler_drop_last_equalizes_shards() {
        let sizes: Vec<usize> = (0..3)
            .map(|rank| DistributedSampler::new(spec(rank, 3), 11, false, true, 0).num_samples())
            .collect();

        assert_eq!(sizes, vec![3, 3, 3]);
    }

    #[test]
    fn sampler_without_shuffle_is_sequential() {
        let sampler = DistributedSampler::new(spec(1, 2), 6, false, false, 0);
        assert_eq!(sampler.indices(), vec![3, 4, 5]);
    }

    #[test]
    fn sampler_shuffle_depends_on_seed_and_epoch_only() {
        let mut a = DistributedSampler::new(spec(0, 2), 200, true, false, 42);
        let mut b = DistributedSampler::new(spec(0, 2), 200, true, false, 42);

        assert_eq!(a.indices(), b.indices());

        a.set_epoch(1);
        assert_ne!(a.indices(), b.indices());

        b.set_epoch(1);
        assert_eq!(a.indices(), b.indices());
    }
}
