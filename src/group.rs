use std::sync::{Arc, Barrier};

use log::debug;

use crate::config::Rendezvous;
use crate::error::{ParallelErr, Result};

/// What a participant announces when joining the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOptions {
    /// Name of the framework's communication backend.
    pub backend: String,
    pub rendezvous: Rendezvous,
    pub rank: usize,
    pub world_size: usize,
}

/// A framework communication context binding a fixed set of participants.
///
/// Both calls are collective: they block until every participant makes them.
pub trait ProcessGroup {
    fn join(&mut self, opts: &GroupOptions) -> Result<()>;

    fn leave(&mut self) -> Result<()>;
}

impl<G: ProcessGroup + ?Sized> ProcessGroup for Box<G> {
    fn join(&mut self, opts: &GroupOptions) -> Result<()> {
        (**self).join(opts)
    }

    fn leave(&mut self) -> Result<()> {
        (**self).leave()
    }
}

/// A group of threads within a single process, synchronized by a barrier.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    barrier: Arc<Barrier>,
    size: usize,
    rank: Option<usize>,
}

impl LocalGroup {
    /// Creates a new `LocalGroup`.
    ///
    /// Every participant must hold a clone of the same group.
    ///
    /// # Arguments
    /// * `size` - The amount of participants.
    ///
    /// # Returns
    /// A new `LocalGroup` instance.
    pub fn new(size: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(size)),
            size,
            rank: None,
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn join(&mut self, opts: &GroupOptions) -> Result<()> {
        if opts.world_size != self.size {
            return Err(ParallelErr::Communication {
                rank: opts.rank,
                msg: format!(
                    "world size {} does not match the local group size {}",
                    opts.world_size, self.size
                ),
            });
        }

        self.barrier.wait();
        self.rank = Some(opts.rank);
        debug!(rank = opts.rank, world_size = self.size; "joined local group");
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        let Some(rank) = self.rank.take() else {
            return Err(ParallelErr::Communication {
                rank: 0,
                msg: "left a local group that was never joined".into(),
            });
        };

        self.barrier.wait();
        debug!(rank = rank; "left local group");
        Ok(())
    }
}
