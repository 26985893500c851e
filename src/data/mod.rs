pub mod dataloader;
pub mod dataset;
pub mod folder;
pub mod shard;
pub mod transform;

pub use dataloader::{Batches, ShardedDataLoader};
pub use dataset::{Dataset, InMemoryDataset};
pub use folder::{ImageFolder, LabeledSample};
pub use shard::{DistributedSampler, ShardSpec, shard_range};
pub use transform::{Identity, Then, Transform, TransformExt};
