//! Scheduler error types

use thiserror::Error;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No display configured; nothing to schedule for
    #[error("no display configured")]
    NoDisplay,

    /// Composition of one display failed
    #[error("composition failed on display '{display}': {source}")]
    Compose {
        display: String,
        #[source]
        source: contracts::ContractError,
    },

    /// Vsync event channel closed while running
    #[error("vsync event channel closed")]
    VsyncChannelClosed,

    /// Model, listener or queue error (from contract)
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl SchedulerError {
    pub fn compose(display: impl Into<String>, source: contracts::ContractError) -> Self {
        Self::Compose {
            display: display.into(),
            source,
        }
    }
}
