//! Staged rollouts
//!
//! A publish notifies the live sessions of one application in ordered
//! batches with a pause between them: the first batch goes out at once so a
//! broken release shows up quickly, later batches are throttled to bound how
//! many agents reload at the same time.
//!
//! ## Modules
//!
//! - `controller` - partitions targets and hands out batches with the delay
//! - `publisher` - drives one publish: select targets, batch, notify, report

pub mod controller;
pub mod publisher;

pub use controller::{partition, RolloutBatch, RolloutController};
pub use publisher::{PublishRequest, Publisher, RolloutAbort, RolloutReport, TargetSelector};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{GatewayError, Result};

/// Parameters of one staged rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Desired number of batches
    pub step_count: usize,
    /// Floor on batch size
    pub min_batch_size: usize,
    /// Wait between consecutive batches
    pub inter_batch_delay: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            step_count: 4,
            min_batch_size: 10,
            inter_batch_delay: Duration::from_secs(5),
        }
    }
}

impl RolloutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_count == 0 {
            return Err(GatewayError::InvalidArgument(
                "rollout step_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
