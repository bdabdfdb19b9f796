//! Bounded polling.
//!
//! Every device wait in this crate (sensor idle, capture done, downstream
//! acknowledgement) runs under a [`PollBudget`]. A poll that keeps failing
//! exhausts the budget and surfaces as [`CamError::DeviceTimeout`] instead of
//! spinning forever.

use serde::{Deserialize, Serialize};

use crate::error::CamError;

/// How many times a condition is polled and how long to sleep between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval_ms: u32,
}

impl PollPolicy {
    pub const fn new(max_attempts: u32, interval_ms: u32) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), CamError> {
        if self.max_attempts == 0 {
            return Err(CamError::InvalidArgument(format!(
                "{name}: max_attempts must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Counts failed polls against a [`PollPolicy`].
#[derive(Debug)]
pub struct PollBudget {
    policy: PollPolicy,
    operation: &'static str,
    failures: u32,
}

impl PollBudget {
    pub fn new(policy: PollPolicy, operation: &'static str) -> Self {
        Self {
            policy,
            operation,
            failures: 0,
        }
    }

    /// Record a failed poll. Errors once `max_attempts` polls have failed.
    pub fn spend(&mut self) -> Result<(), CamError> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return Err(CamError::DeviceTimeout {
                operation: self.operation,
                attempts: self.failures,
            });
        }
        Ok(())
    }

    pub fn interval_ms(&self) -> u32 {
        self.policy.interval_ms
    }

    /// Polls made so far, counting the one in flight.
    pub fn attempts(&self) -> u32 {
        self.failures + 1
    }
}
