use log::{debug, warn};

use crate::backend::Backend;
use crate::config::ReplicaOptions;
use crate::error::{ParallelErr, Result};

/// A model as seen by the launcher: something that can be moved to a device and run.
pub trait Module {
    type Input;
    type Output;

    /// Moves every parameter to `device`.
    fn to_device(&mut self, device: usize) -> Result<()>;

    fn forward(&mut self, input: Self::Input) -> Self::Output;
}

/// A module wrapped by the framework so its gradients are kept in sync with its peers.
pub trait Replica {
    type Input;
    type Output;

    fn forward(&mut self, input: Self::Input) -> Self::Output;

    /// Names of the parameters that received no gradient in the last backward pass.
    fn unused_parameters(&self) -> Vec<String>;

    /// Exchanges the local gradients with every peer replica.
    fn synchronize(&mut self) -> Result<()>;
}

/// The framework's data-parallel wrapping of a `Module`.
pub trait Replicate<M: Module> {
    type Replica: Replica<Input = M::Input, Output = M::Output>;

    fn replicate(&self, module: M, opts: &ReplicaOptions) -> Result<Self::Replica>;
}

/// A model replica bound to one device, forwarding calls to the framework's wrapper.
pub struct ParallelModel<R> {
    replica: R,
    opts: ReplicaOptions,
}

impl<R: Replica> ParallelModel<R> {
    /// Places `module` on the requested device and wraps it for data parallelism.
    ///
    /// # Args
    /// * `module` - The local model.
    /// * `backend` - The framework doing placement and replication.
    /// * `opts` - Target device and unused-parameter tolerance.
    ///
    /// # Errors
    /// Propagates placement and replication failures from the framework.
    pub fn new<M, B>(mut module: M, backend: &B, opts: ReplicaOptions) -> Result<Self>
    where
        M: Module,
        B: Backend + Replicate<M, Replica = R>,
    {
        backend.set_device(opts.device)?;
        module.to_device(opts.device)?;
        let replica = backend.replicate(module, &opts)?;

        debug!(
            device = opts.device,
            find_unused_parameters = opts.find_unused_parameters;
            "wrapped model replica"
        );

        Ok(Self { replica, opts })
    }

    /// Runs the replica's forward pass and returns whatever it returns.
    #[inline]
    pub fn forward(&mut self, input: R::Input) -> R::Output {
        self.replica.forward(input)
    }

    /// Synchronizes gradients after a backward pass.
    ///
    /// # Errors
    /// Returns `UnusedParameters` if some parameter got no gradient and unused
    /// parameters aren't tolerated, or the framework's synchronization error.
    pub fn synchronize(&mut self) -> Result<()> {
        let unused = self.replica.unused_parameters();

        if !unused.is_empty() {
            if !self.opts.find_unused_parameters {
                return Err(ParallelErr::UnusedParameters { names: unused });
            }

            warn!(device = self.opts.device, unused = unused.len(); "parameters received no gradient");
        }

        self.replica.synchronize()
    }

    #[inline]
    pub fn device(&self) -> usize {
        self.opts.device
    }

    #[inline]
    pub fn options(&self) -> &ReplicaOptions {
        &self.opts
    }

    #[inline]
    pub fn replica(&self) -> &R {
        &self.replica
    }

    #[inline]
    pub fn replica_mut(&mut self) -> &mut R {
        &mut self.replica
    }

    pub fn into_inner(self) -> R {
        self.replica
    }
}
