//! Configuration glue over a distributed-training framework: a sharded data
//! loader, a data-parallel model wrapper and a multi-worker launcher.
//!
//! The framework itself (devices, process groups, gradient synchronization) is
//! reached through the [`Backend`], [`ProcessGroup`] and [`Replicate`] traits.

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod group;
pub mod launch;
pub mod model;

pub use backend::{Backend, LocalBackend};
pub use config::{
    LaunchConfig, LoaderConfig, Rendezvous, ReplicaOptions, TrainingConfig, WorldContext,
};
pub use data::{Dataset, ImageFolder, InMemoryDataset, ShardedDataLoader};
pub use error::{ParallelErr, Result};
pub use group::{GroupOptions, LocalGroup, ProcessGroup};
pub use launch::{Launcher, ProcessSpawner, Spawner, ThreadSpawner, Worker, WorkerState};
pub use model::{Module, ParallelModel, Replica, Replicate};
