use std::collections::BTreeSet;

use orchestra_parallel::{
    InMemoryDataset, LoaderConfig, ParallelErr, Result, ShardedDataLoader, WorldContext,
};

fn dataset(n: usize) -> InMemoryDataset<usize, usize> {
    InMemoryDataset::new((0..n).collect(), (0..n).map(|i| i % 10).collect()).unwrap()
}

/// The indices a participant visits during one epoch.
fn epoch_indices(loader: &mut Loader) -> Vec<usize> {
    loader
        .iter()
        .collect::<Result<Vec<_>>>()
        .unwrap()
        .into_iter()
        .flatten()
        .map(|(x, _)| x)
        .collect()
}

type Loader = ShardedDataLoader<InMemoryDataset<usize, usize>>;

fn loaders(n: usize, world_size: usize, cfg: LoaderConfig) -> Vec<Loader> {
    (0..world_size)
        .map(|rank| {
            let ctx = WorldContext::new(rank, world_size).unwrap();
            ShardedDataLoader::new(dataset(n), &ctx, cfg.clone()).unwrap()
        })
        .collect()
}

#[test]
fn partitions_are_disjoint_balanced_and_complete() {
    for n in [0, 1, 7, 10, 64, 101] {
        for world_size in [1, 2, 3, 4, 8] {
            let mut seen = Vec::new();
            let mut sizes = Vec::new();

            for mut loader in loaders(n, world_size, LoaderConfig::new(world_size)) {
                let indices = epoch_indices(&mut loader);
                sizes.push(indices.len());
                seen.extend(indices);
            }

            let unique: BTreeSet<_> = seen.iter().copied().collect();
            assert_eq!(seen.len(), n, "n={n} world_size={world_size}");
            assert_eq!(unique, (0..n).collect::<BTreeSet<_>>(), "n={n} world_size={world_size}");

            let max = sizes.iter().max().unwrap();
            let min = sizes.iter().min().unwrap();
            assert!(max - min <= 1, "n={n} world_size={world_size} sizes={sizes:?}");
        }
    }
}

#[test]
fn indivisible_batch_size_fails_before_iteration() {
    let ctx = WorldContext::new(0, 3).unwrap();
    let res = ShardedDataLoader::new(dataset(30), &ctx, LoaderConfig::new(10));

    assert!(matches!(res, Err(ParallelErr::NotDivisible { .. })));
}

#[test]
fn drop_last_yields_whole_batches_only() {
    let world_size = 3;
    let cfg = LoaderConfig::new(6).drop_last(true).shuffle(true).seed(3);

    for mut loader in loaders(47, world_size, cfg) {
        let local_partition = loader.sampler().num_samples();
        let local_batch = loader.batch_size();
        let expected = (local_partition / local_batch) * local_batch;

        let batches = loader.iter().collect::<Result<Vec<_>>>().unwrap();

        assert_eq!(local_partition, 15);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), expected);
        assert!(batches.iter().all(|b| b.len() == local_batch));
        assert_eq!(loader.num_samples(), expected);
    }
}

#[test]
fn drop_last_keeps_participants_disjoint() {
    let mut seen = Vec::new();
    for mut loader in loaders(23, 4, LoaderConfig::new(4).drop_last(true)) {
        seen.extend(epoch_indices(&mut loader));
    }

    let unique: BTreeSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());
}

#[test]
fn shuffle_changes_order_but_not_membership() {
    let cfg = LoaderConfig::new(4).shuffle(true).seed(1234);

    for mut loader in loaders(400, 2, cfg) {
        let first = epoch_indices(&mut loader);
        let second = epoch_indices(&mut loader);

        assert_ne!(first, second);

        let a: BTreeSet<_> = first.into_iter().collect();
        let b: BTreeSet<_> = second.into_iter().collect();
        assert_eq!(a, b);
    }
}

#[test]
fn shuffle_is_reproducible_for_the_same_epoch() {
    let cfg = LoaderConfig::new(2).shuffle(true).seed(99);
    let ctx = WorldContext::new(1, 2).unwrap();

    let mut a = ShardedDataLoader::new(dataset(50), &ctx, cfg.clone()).unwrap();
    let mut b = ShardedDataLoader::new(dataset(50), &ctx, cfg).unwrap();

    a.set_epoch(5);
    b.set_epoch(5);
    assert_eq!(epoch_indices(&mut a), epoch_indices(&mut b));
}

#[test]
fn threaded_loading_matches_inline_loading() {
    let ctx = WorldContext::new(0, 2).unwrap();
    let cfg = LoaderConfig::new(8).shuffle(true).seed(5);

    let mut inline = ShardedDataLoader::new(dataset(100), &ctx, cfg.clone()).unwrap();
    let mut threaded = ShardedDataLoader::new(dataset(100), &ctx, cfg.num_workers(6)).unwrap();

    assert_eq!(threaded.num_workers(), 3);
    assert_eq!(epoch_indices(&mut inline), epoch_indices(&mut threaded));
}
