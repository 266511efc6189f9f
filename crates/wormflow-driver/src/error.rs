//! Error types for pipeline operations

use std::path::PathBuf;
use thiserror::Error;
use wormflow_chip::tiers::TierKind;

use crate::program::StageId;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while preparing, running or reading back a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Memory tier has no free region large enough
    #[error("Allocation of {requested} bytes failed in {tier}: largest free region is {available} bytes")]
    Allocation {
        /// Tier the allocation was attempted in
        tier: TierKind,
        /// Requested size in bytes
        requested: u64,
        /// Largest contiguous free region in bytes
        available: u64,
    },

    /// Chunking or stage bindings are not admissible
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// Reason for failure
        reason: String,
    },

    /// Host ↔ device copy failed
    #[error("Transfer failed: {reason}")]
    Transfer {
        /// Reason for failure
        reason: String,
    },

    /// Host array length does not match the buffer's element count
    #[error("Size mismatch: buffer holds {expected} elements, host array has {actual}")]
    SizeMismatch {
        /// Element count of the device buffer
        expected: usize,
        /// Element count of the host array
        actual: usize,
    },

    /// One or more stages failed to complete
    #[error("Launch failed: {stage} stage: {fault}")]
    Launch {
        /// First stage that failed
        stage: StageId,
        /// What went wrong in that stage
        #[source]
        fault: StageFault,
    },

    /// Operation not valid in the orchestrator's current state
    #[error("Pipeline in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Configuration file missing
    #[error("Config file not found: {path}")]
    ConfigNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error while reading configuration
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::PipelineConfig`]
    #[error("Config parse error: {source}")]
    ConfigParse {
        /// Underlying parse error
        #[from]
        source: toml::de::Error,
    },
}

impl PipelineError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(reason: impl Into<String>) -> Self {
        Self::Transfer {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Stage that caused a launch failure, if this is one
    pub const fn failed_stage(&self) -> Option<StageId> {
        match self {
            Self::Launch { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Faults raised inside a running stage.
///
/// These never escape a run directly; [`crate::Orchestrator::run`] wraps the
/// first one in [`PipelineError::Launch`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFault {
    /// The stage on the other end of a queue has gone away
    #[error("peer on queue c{queue} disconnected")]
    Disconnected {
        /// Queue index
        queue: u8,
    },

    /// Run deadline expired while blocked
    #[error("run deadline expired while waiting on {resource}")]
    Timeout {
        /// What the stage was blocked on
        resource: String,
    },

    /// Accumulation register misuse or operand mismatch
    #[error("register bank: {reason}")]
    RegisterBank {
        /// Reason for failure
        reason: String,
    },

    /// Off-chip access outside any allocated buffer
    #[error("memory access: {reason}")]
    Memory {
        /// Reason for failure
        reason: String,
    },

    /// The stage thread could not be started
    #[error("failed to start: {reason}")]
    Spawn {
        /// Reason for failure
        reason: String,
    },

    /// The stage thread panicked (precondition violation)
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string
        message: String,
    },
}

impl StageFault {
    /// Create a timeout fault
    pub fn timeout(resource: impl Into<String>) -> Self {
        Self::Timeout {
            resource: resource.into(),
        }
    }

    /// Create a register bank fault
    pub fn register_bank(reason: impl Into<String>) -> Self {
        Self::RegisterBank {
            reason: reason.into(),
        }
    }

    /// Create a memory fault
    pub fn memory(reason: impl Into<String>) -> Self {
        Self::Memory {
            reason: reason.into(),
        }
    }

    /// True when this fault is only the echo of a failure elsewhere.
    ///
    /// A stage that dies drops its queue endpoints, so its peers see
    /// `Disconnected`. Those are never the root cause of a failed run.
    pub const fn is_cascade(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
