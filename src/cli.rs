use clap::ValueEnum;

use cpdl::InvalidCheckpointPolicy;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OnInvalid {
    /// Stop and leave the checkpoint for inspection
    Abort,
    /// Delete the checkpoint and download everything again
    Restart,
}

impl From<OnInvalid> for InvalidCheckpointPolicy {
    fn from(value: OnInvalid) -> Self {
        match value {
            OnInvalid::Abort => InvalidCheckpointPolicy::Abort,
            OnInvalid::Restart => InvalidCheckpointPolicy::Restart,
        }
    }
}
