//! Node configuration.

use std::time::Duration;

use crate::error::SetupError;

/// Configuration for one node's participation in an instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Total number of acceptors in the quorum.
    pub quorum_size: usize,
    /// Batch window for permit-granted and nack grouping.
    pub take_cutoff: Duration,
    /// Inbound silence threshold before the node self-elects.
    pub delay_before_claiming_leadership: Duration,
    /// Override for the majority count; `None` asks the
    /// [`ValueApi`](crate::traits::ValueApi) for its default.
    pub majority_override: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            quorum_size: 1,
            take_cutoff: Duration::from_millis(100),
            delay_before_claiming_leadership: Duration::from_secs(1),
            majority_override: None,
        }
    }
}

impl NodeConfig {
    /// Validate the configuration before wiring any stream.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for an empty quorum, a zero batch
    /// window, or an unsatisfiable majority override.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.quorum_size == 0 {
            return Err(SetupError::EmptyQuorum);
        }
        if self.take_cutoff.is_zero() {
            return Err(SetupError::ZeroCutoff);
        }
        if let Some(majority) = self.majority_override
            && majority > self.quorum_size
        {
            return Err(SetupError::MajorityOverQuorum {
                majority,
                quorum_size: self.quorum_size,
            });
        }
        Ok(())
    }
}
