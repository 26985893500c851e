use std::{env, fs, num::NonZeroUsize, path::Path};

use serde::Deserialize;

use crate::error::{ParallelErr, Result};

const DEFAULT_ADDR: &str = "localhost";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_BACKEND: &str = "nccl";

/// Environment variable carrying the rendezvous address.
pub const ENV_MASTER_ADDR: &str = "MASTER_ADDR";
/// Environment variable carrying the rendezvous port.
pub const ENV_MASTER_PORT: &str = "MASTER_PORT";

/// The identity of a participant within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldContext {
    rank: usize,
    world_size: NonZeroUsize,
}

impl WorldContext {
    /// Creates a new world context.
    ///
    /// # Args
    /// * `rank` - This participant's index.
    /// * `world_size` - The total number of participants.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the world is empty or `rank` falls outside of it.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        let world_size = NonZeroUsize::new(world_size)
            .ok_or_else(|| ParallelErr::InvalidConfig("world size must be greater than 0".into()))?;

        if rank >= world_size.get() {
            return Err(ParallelErr::InvalidConfig(format!(
                "rank ({rank}) must be smaller than the world size ({world_size})"
            )));
        }

        Ok(Self { rank, world_size })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size.get()
    }

    /// Whether this is the participant whose output stays visible.
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }
}

/// Where participants meet to form the process group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Rendezvous {
    pub addr: String,
    pub port: u16,
}

impl Rendezvous {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }

    /// Reads `MASTER_ADDR` and `MASTER_PORT`, falling back to the defaults when unset.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the port isn't a valid number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let addr = lookup(ENV_MASTER_ADDR).unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let port = match lookup(ENV_MASTER_PORT) {
            Some(port) => port.parse().map_err(|_| {
                ParallelErr::InvalidConfig(format!("{ENV_MASTER_PORT} is not a valid port: {port:?}"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self { addr, port })
    }

    /// The variables the framework's communication backend expects.
    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            (ENV_MASTER_ADDR, self.addr.clone()),
            (ENV_MASTER_PORT, self.port.to_string()),
        ]
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new(DEFAULT_ADDR, DEFAULT_PORT)
    }
}

/// Global (not per-participant) data loading options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoaderConfig {
    /// Global batch size, split evenly among participants.
    pub batch_size: usize,
    #[serde(default)]
    pub shuffle: bool,
    /// Global loading thread count, split evenly among participants.
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default)]
    pub pin_memory: bool,
    #[serde(default)]
    pub drop_last: bool,
    /// Shared by every participant so shuffles agree.
    #[serde(default)]
    pub seed: u64,
}

impl LoaderConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            num_workers: 0,
            pin_memory: false,
            drop_last: false,
            seed: 0,
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn pin_memory(mut self, pin_memory: bool) -> Self {
        self.pin_memory = pin_memory;
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// How a model replica is placed and synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ReplicaOptions {
    /// Index of the compute device the replica is bound to.
    pub device: usize,
    /// Tolerate parameters that receive no gradient in a pass.
    pub find_unused_parameters: bool,
}

impl ReplicaOptions {
    pub fn new(device: usize) -> Self {
        Self {
            device,
            find_unused_parameters: false,
        }
    }

    pub fn find_unused_parameters(mut self, find_unused_parameters: bool) -> Self {
        self.find_unused_parameters = find_unused_parameters;
        self
    }
}

/// Launch options shared by every worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub rendezvous: Rendezvous,
    /// Name of the framework's communication backend.
    pub backend: String,
    /// Silence stdout/stderr of every rank but 0 while the worker function runs.
    pub suppress_io: bool,
    /// Overrides the backend's device count.
    pub world_size: Option<usize>,
}

impl LaunchConfig {
    pub fn new(rendezvous: Rendezvous, backend: impl Into<String>) -> Self {
        Self {
            rendezvous,
            backend: backend.into(),
            ..Self::default()
        }
    }

    pub fn suppress_io(mut self, suppress_io: bool) -> Self {
        self.suppress_io = suppress_io;
        self
    }

    pub fn world_size(mut self, world_size: usize) -> Self {
        self.world_size = Some(world_size);
        self
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            rendezvous: Rendezvous::default(),
            backend: DEFAULT_BACKEND.to_string(),
            suppress_io: true,
            world_size: None,
        }
    }
}

/// Everything a training entry point needs, as read from a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrainingConfig {
    pub loader: LoaderConfig,
    #[serde(default)]
    pub replica: ReplicaOptions,
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl TrainingConfig {
    /// Parses a training configuration from JSON.
    ///
    /// # Errors
    /// Returns `Serialization` if the document is malformed.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    /// Returns `Io` if the file can't be read, `Serialization` if it isn't valid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
