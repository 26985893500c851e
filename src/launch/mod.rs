mod spawn;
mod stdio;
mod worker;

use log::info;
use serde::{Serialize, de::DeserializeOwned};

pub use spawn::{
    ENV_LOCAL_RANK, ENV_RANK, ENV_RESULT_PATH, ENV_WORLD_SIZE, ProcessSpawner, Spawner,
    ThreadSpawner,
};
pub use stdio::SuppressGuard;
pub use worker::{Worker, WorkerState};

use crate::backend::Backend;
use crate::config::LaunchConfig;
use crate::error::{ParallelErr, Result};
use crate::group::GroupOptions;

/// Starts one worker per device and runs a training function on each of them.
pub struct Launcher<B, S = ProcessSpawner> {
    config: LaunchConfig,
    backend: B,
    spawner: S,
}

impl<B: Backend> Launcher<B> {
    /// Creates a launcher spawning one process per device by re-executing the current binary.
    ///
    /// # Errors
    /// Fails if the current executable can't be located.
    pub fn new(config: LaunchConfig, backend: B) -> Result<Self> {
        Ok(Self::with_spawner(config, backend, ProcessSpawner::current()?))
    }
}

impl<B: Backend, S: Spawner> Launcher<B, S> {
    pub fn with_spawner(config: LaunchConfig, backend: B, spawner: S) -> Self {
        Self {
            config,
            backend,
            spawner,
        }
    }

    #[inline]
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The amount of workers `launch` starts.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when there's nothing to run on.
    pub fn world_size(&self) -> Result<usize> {
        let world_size = self
            .config
            .world_size
            .unwrap_or_else(|| self.backend.device_count());

        if world_size == 0 {
            return Err(ParallelErr::InvalidConfig(
                "no compute devices available".into(),
            ));
        }

        Ok(world_size)
    }

    /// Runs `f(rank)` on every worker and returns the results in rank order.
    ///
    /// Each worker joins the process group, runs `f`, and leaves the group even
    /// if `f` fails. Unless disabled, every rank but 0 runs `f` with stdout and
    /// stderr silenced. With a spawner sharing one process among ranks, such as
    /// `ThreadSpawner`, the silencing applies to the whole process, so rank 0's
    /// output is lost while any other rank is still running `f`; the output is
    /// restored once every rank is done.
    ///
    /// # Errors
    /// Fails as soon as any worker fails; there are no retries.
    pub fn launch<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        let world_size = self.world_size()?;

        info!(
            world_size = world_size,
            backend = self.config.backend.as_str(),
            addr = self.config.rendezvous.addr.as_str(),
            port = self.config.rendezvous.port;
            "launching training"
        );

        let backend = &self.backend;
        let config = &self.config;
        let f = &f;

        let results = self
            .spawner
            .spawn(&config.rendezvous, world_size, move |rank| {
                let group = backend.process_group(rank)?;
                let opts = GroupOptions {
                    backend: config.backend.clone(),
                    rendezvous: config.rendezvous.clone(),
                    rank,
                    world_size,
                };

                Worker::new(group, opts)
                    .suppress_io(config.suppress_io)
                    .run(f)
            })?;

        info!(world_size = world_size; "training finished");
        Ok(results)
    }
}
