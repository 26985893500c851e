use crate::error::{ParallelErr, Result};
use crate::group::{LocalGroup, ProcessGroup};

/// The distributed-compute framework this crate configures.
///
/// Device placement and collective communication live behind this trait; the
/// crate only decides how many participants there are and when they meet.
pub trait Backend: Sync {
    type Group: ProcessGroup;

    /// Amount of compute devices visible to this process.
    fn device_count(&self) -> usize;

    /// Makes `device` the current device of the calling participant.
    fn set_device(&self, device: usize) -> Result<()>;

    /// Returns the (not yet joined) process group handle for `rank`.
    fn process_group(&self, rank: usize) -> Result<Self::Group>;
}

/// Runs every participant as a thread of the current process.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    devices: usize,
    group: LocalGroup,
}

impl LocalBackend {
    pub fn new(devices: usize) -> Self {
        Self {
            devices,
            group: LocalGroup::new(devices),
        }
    }
}

impl Backend for LocalBackend {
    type Group = LocalGroup;

    fn device_count(&self) -> usize {
        self.devices
    }

    fn set_device(&self, device: usize) -> Result<()> {
        if device >= self.devices {
            return Err(ParallelErr::InvalidConfig(format!(
                "device {device} out of range, {} device(s) available",
                self.devices
            )));
        }

        Ok(())
    }

    fn process_group(&self, _rank: usize) -> Result<LocalGroup> {
        Ok(self.group.clone())
    }
}
