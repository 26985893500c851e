use std::vec;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use super::dataset::Dataset;
use super::shard::{DistributedSampler, ShardSpec};
use crate::config::{LoaderConfig, WorldContext};
use crate::error::{ParallelErr, Result};

/// Shard-aware loader producing this participant's batches.
///
/// The global batch size and loading thread count are split evenly among the
/// participants, so every participant consumes the same amount per step.
pub struct ShardedDataLoader<D: Dataset> {
    dataset: D,
    sampler: DistributedSampler,
    batch_size: usize,
    num_workers: usize,
    pin_memory: bool,
    drop_last: bool,
    pool: Option<ThreadPool>,
}

impl<D: Dataset> ShardedDataLoader<D> {
    /// Creates a new loader for the participant described by `ctx`.
    ///
    /// # Args
    /// * `dataset` - The full dataset; every participant sees the same one.
    /// * `ctx` - This participant's rank and the world size.
    /// * `cfg` - Global loading options.
    ///
    /// # Errors
    /// Returns a configuration error if the batch size or the thread count
    /// can't be split evenly among the participants, or the batch size is 0.
    pub fn new(dataset: D, ctx: &WorldContext, cfg: LoaderConfig) -> Result<Self> {
        let participants = ctx.world_size();

        if cfg.batch_size == 0 {
            return Err(ParallelErr::InvalidConfig(
                "batch size must be greater than 0".into(),
            ));
        }

        if cfg.batch_size % participants != 0 {
            return Err(ParallelErr::NotDivisible {
                what: "batch size",
                value: cfg.batch_size,
                participants,
            });
        }

        if cfg.num_workers % participants != 0 {
            return Err(ParallelErr::NotDivisible {
                what: "worker count",
                value: cfg.num_workers,
                participants,
            });
        }

        let batch_size = cfg.batch_size / participants;
        let num_workers = cfg.num_workers / participants;

        let pool = match num_workers {
            0 => None,
            n => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("loader-{i}"))
                    .build()
                    .map_err(|e| ParallelErr::InvalidConfig(format!("loader threads: {e}")))?,
            ),
        };

        let sampler = DistributedSampler::new(
            ShardSpec::from(ctx),
            dataset.len(),
            cfg.shuffle,
            cfg.drop_last,
            cfg.seed,
        );

        debug!(
            rank = ctx.rank(),
            world_size = participants,
            batch_size = batch_size,
            num_workers = num_workers,
            samples = sampler.num_samples();
            "created sharded loader"
        );

        Ok(Self {
            dataset,
            sampler,
            batch_size,
            num_workers,
            pin_memory: cfg.pin_memory,
            drop_last: cfg.drop_last,
            pool,
        })
    }

    /// Per-participant batch size.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Per-participant loading threads; 0 loads on the calling thread.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    #[inline]
    pub fn pin_memory(&self) -> bool {
        self.pin_memory
    }

    #[inline]
    pub fn sampler(&self) -> &DistributedSampler {
        &self.sampler
    }

    #[inline]
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// The epoch the next call to `iter` will produce.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.sampler.epoch()
    }

    #[inline]
    pub fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }

    /// Amount of samples yielded per epoch.
    pub fn num_samples(&self) -> usize {
        let n = self.sampler.num_samples();
        if self.drop_last {
            n - n % self.batch_size
        } else {
            n
        }
    }

    /// Amount of batches yielded per epoch.
    pub fn len(&self) -> usize {
        let n = self.sampler.num_samples();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the batches of the current epoch and advances to the next one.
    pub fn iter(&mut self) -> Batches<'_, D> {
        let indices = self.sampler.indices();
        let epoch = self.sampler.epoch();
        self.sampler.set_epoch(epoch + 1);

        Batches {
            loader: self,
            indices: indices.into_iter(),
        }
    }

    fn fetch(&self, indices: &[usize]) -> Result<Vec<D::Item>> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&idx| self.dataset.get(idx))
                    .collect()
            }),
            None => indices.iter().map(|&idx| self.dataset.get(idx)).collect(),
        }
    }
}

/// One epoch's worth of batches.
pub struct Batches<'a, D: Dataset> {
    loader: &'a ShardedDataLoader<D>,
    indices: vec::IntoIter<usize>,
}

impl<D: Dataset> Iterator for Batches<'_, D> {
    type Item = Result<Vec<D::Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.indices.by_ref().take(self.loader.batch_size).collect();

        if batch.is_empty() || (self.loader.drop_last && batch.len() < self.loader.batch_size) {
            return None;
        }

        Some(self.loader.fetch(&batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;

    fn dataset(n: usize) -> InMemoryDataset<f32, f32> {
        InMemoryDataset::new(
            (0..n).map(|i| i as f32).collect(),
            (0..n).map(|i| (i as f32) + 100.0).collect(),
        )
        .unwrap()
    }

    #[test]
    fn dataloader_batches_respect_shard_and_batch_size() {
        let ctx = WorldContext::new(1, 3).unwrap(); // 4..7
        let mut dl = ShardedDataLoader::new(dataset(10), &ctx, LoaderConfig::new(6)).unwrap();

        assert_eq!(dl.sampler().range(), 4..7);
        assert_eq!(dl.batch_size(), 2);
        assert_eq!(dl.len(), 2);

        let batches: Vec<_> = dl.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches[0], vec![(4.0, 104.0), (5.0, 105.0)]);
        assert_eq!(batches[1], vec![(6.0, 106.0)]);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn dataloader_drop_last_discards_partial_batch() {
        let ctx = WorldContext::new(0, 2).unwrap();
        let cfg = LoaderConfig::new(4).drop_last(true);
        let mut dl = ShardedDataLoader::new(dataset(11), &ctx, cfg).unwrap();

        // 11 -> 10 samples, 5 per participant, batches of 2 -> 2 batches.
        assert_eq!(dl.len(), 2);
        assert_eq!(dl.num_samples(), 4);

        let batches: Vec<_> = dl.iter().collect::<Result<_>>().unwrap();
        assert!(batches.iter().all(|b| b.len() == 2));
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn dataloader_splits_worker_threads() {
        let ctx = WorldContext::new(0, 2).unwrap();
        let cfg = LoaderConfig::new(4).num_workers(4).pin_memory(true);
        let mut dl = ShardedDataLoader::new(dataset(8), &ctx, cfg).unwrap();

        assert_eq!(dl.num_workers(), 2);
        assert!(dl.pin_memory());

        let batches: Vec<_> = dl.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches[0], vec![(0.0, 100.0), (1.0, 101.0)]);
        assert_eq!(batches[1], vec![(2.0, 102.0), (3.0, 103.0)]);
    }

    #[test]
    fn dataloader_rejects_indivisible_batch_size() {
        let ctx = WorldContext::new(0, 4).unwrap();
        let res = ShardedDataLoader::new(dataset(8), &ctx, LoaderConfig::new(6));

        assert!(matches!(
            res,
            Err(ParallelErr::NotDivisible {
                what: "batch size",
                value: 6,
                participants: 4
            })
        ));
    }

    #[test]
    fn dataloader_rejects_indivisible_worker_count() {
        let ctx = WorldContext::new(0, 2).unwrap();
        let res = ShardedDataLoader::new(dataset(8), &ctx, LoaderConfig::new(4).num_workers(3));

        assert!(matches!(
            res,
            Err(ParallelErr::NotDivisible {
                what: "worker count",
                ..
            })
        ));
    }

    #[test]
    fn dataloader_rejects_zero_batch_size() {
        let ctx = WorldContext::new(0, 1).unwrap();
        assert!(ShardedDataLoader::new(dataset(8), &ctx, LoaderConfig::new(0)).is_err());
    }

    #[test]
    fn dataloader_iter_advances_epoch() {
        let ctx = WorldContext::new(0, 1).unwrap();
        let mut dl = ShardedDataLoader::new(dataset(4), &ctx, LoaderConfig::new(2)).unwrap();

        assert_eq!(dl.epoch(), 0);
        let _ = dl.iter().count();
        assert_eq!(dl.epoch(), 1);

        dl.set_epoch(7);
        assert_eq!(dl.epoch(), 7);
    }
}
