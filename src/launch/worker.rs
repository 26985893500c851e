use log::{debug, warn};

use super::stdio::SuppressGuard;
use crate::error::{ParallelErr, Result};
use crate::group::{GroupOptions, ProcessGroup};

/// Lifecycle of a single participant.
///
/// `Uninitialized -> Joined -> Running -> {Completed | Failed} -> Left`.
/// A failed join ends in `Failed` without leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Joined,
    Running,
    Completed,
    Failed,
    Left,
}

/// One participant: joins the group, runs the training function, leaves the group.
pub struct Worker<G> {
    group: G,
    opts: GroupOptions,
    suppress_io: bool,
    state: WorkerState,
}

impl<G: ProcessGroup> Worker<G> {
    /// Creates a new worker.
    ///
    /// # Args
    /// * `group` - The not yet joined process group handle.
    /// * `opts` - Rank, world size and rendezvous announced on join.
    pub fn new(group: G, opts: GroupOptions) -> Self {
        Self {
            group,
            opts,
            suppress_io: false,
            state: WorkerState::Uninitialized,
        }
    }

    /// Silences stdout and stderr while the training function runs, unless this is rank 0.
    ///
    /// The silencing is process-wide; see `SuppressGuard`.
    pub fn suppress_io(mut self, suppress_io: bool) -> Self {
        self.suppress_io = suppress_io;
        self
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.opts.rank
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs `f(rank)` inside the process group.
    ///
    /// The group is left whatever `f` does, including when it panics.
    ///
    /// # Errors
    /// Returns the join error, `f`'s error, or the leave error, in that precedence.
    /// A worker can only run once.
    pub fn run<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(usize) -> Result<T>,
    {
        let rank = self.opts.rank;

        if self.state != WorkerState::Uninitialized {
            return Err(ParallelErr::InvalidConfig(format!(
                "worker {rank} already ran, a group can't be rejoined"
            )));
        }

        if let Err(e) = self.group.join(&self.opts) {
            self.state = WorkerState::Failed;
            return Err(e);
        }
        self.state = WorkerState::Joined;
        debug!(rank = rank, world_size = self.opts.world_size; "joined process group");

        let membership = Membership {
            group: &mut self.group,
            rank,
            left: false,
        };

        self.state = WorkerState::Running;
        let outcome = call(f, rank, self.suppress_io && rank != 0);
        self.state = match outcome {
            Ok(_) => WorkerState::Completed,
            Err(_) => WorkerState::Failed,
        };

        let left = membership.leave();
        self.state = WorkerState::Left;
        debug!(rank = rank; "left process group");

        match (outcome, left) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(leave_err)) => {
                warn!(rank = rank; "failed to leave process group after error: {leave_err}");
                Err(e)
            }
        }
    }
}

fn call<T, F>(f: F, rank: usize, quiet: bool) -> Result<T>
where
    F: FnOnce(usize) -> Result<T>,
{
    let _quiet = match quiet {
        true => Some(SuppressGuard::acquire()?),
        false => None,
    };

    f(rank)
}

/// Leaves the group when dropped, unless it was already left explicitly.
struct Membership<'a, G: ProcessGroup> {
    group: &'a mut G,
    rank: usize,
    left: bool,
}

impl<G: ProcessGroup> Membership<'_, G> {
    fn leave(mut self) -> Result<()> {
        self.left = true;
        self.group.leave()
    }
}

impl<G: ProcessGroup> Drop for Membership<'_, G> {
    fn drop(&mut self) {
        if self.left {
            return;
        }

        if let Err(e) = self.group.leave() {
            warn!(rank = self.rank; "failed to leave process group while unwinding: {e}");
        }
    }
}
