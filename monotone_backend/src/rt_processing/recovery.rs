//! Turns device faults back into a writable stream, or into a fatal error.

use std::thread;
use std::time::Duration;

use monotone_core::SynthConfig;
use tracing::{error, warn};

use crate::audio_device::{DeviceError, PcmDevice, ResumeError, WriteError};

/// A fault that was handled and left the device writable again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveredFault {
    Underrun,
    Suspended,
}

#[derive(Debug, thiserror::Error)]
pub enum FatalDeviceError {
    #[error("unrecoverable write error: {0}")]
    Write(WriteError),
    #[error("can't recover from underrun, prepare failed: {0}")]
    UnderrunPrepare(#[source] DeviceError),
    #[error("can't recover from suspend, prepare failed: {0}")]
    SuspendPrepare(#[source] DeviceError),
    #[error("device still suspended after {attempts} resume attempts")]
    ResumeExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl ResumePolicy {
    pub fn from_config(config: &SynthConfig) -> Self {
        Self {
            poll_interval: config.resume_poll_interval(),
            max_attempts: config.resume_max_attempts,
        }
    }
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::from_config(&SynthConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recovery {
    policy: ResumePolicy,
}

impl Recovery {
    pub fn new(policy: ResumePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ResumePolicy {
        self.policy
    }

    /// Handle a failed write.
    ///
    /// `TryAgain` never reaches here; the streaming loop retries it in place.
    pub fn recover<D: PcmDevice + ?Sized>(
        &self,
        device: &mut D,
        fault: WriteError,
    ) -> Result<RecoveredFault, FatalDeviceError> {
        match fault {
            WriteError::Underrun => {
                warn!("Stream recovery: underrun");
                device.prepare().map_err(|e| {
                    error!("Can't recover from underrun, prepare failed: {}", e);
                    FatalDeviceError::UnderrunPrepare(e)
                })?;
                Ok(RecoveredFault::Underrun)
            }
            WriteError::Suspended => {
                warn!("Stream recovery: device suspended");
                self.resume(device)?;
                Ok(RecoveredFault::Suspended)
            }
            other => {
                error!("Write error: {}", other);
                Err(FatalDeviceError::Write(other))
            }
        }
    }

    fn resume<D: PcmDevice + ?Sized>(&self, device: &mut D) -> Result<(), FatalDeviceError> {
        let mut attempts = 0;
        loop {
            match device.resume() {
                Ok(()) => return Ok(()),
                Err(ResumeError::TryAgain) => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        error!("Device still suspended after {} resume attempts", attempts);
                        return Err(FatalDeviceError::ResumeExhausted { attempts });
                    }
                    thread::sleep(self.policy.poll_interval);
                }
                Err(ResumeError::Failed(reason)) => {
                    warn!("Resume failed ({}), preparing instead", reason);
                    return device.prepare().map_err(|e| {
                        error!("Can't recover from suspend, prepare failed: {}", e);
                        FatalDeviceError::SuspendPrepare(e)
                    });
                }
            }
        }
    }
}
