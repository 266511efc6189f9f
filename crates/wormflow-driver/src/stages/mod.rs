//! Stage kernels.
//!
//! Each kernel owns its queue endpoints for the duration of a run and is
//! executed on its own thread by the orchestrator. Returning (or unwinding)
//! drops the endpoints, which is how a failed stage unblocks its peers.

mod compute;
mod inbound;
mod outbound;

pub(crate) use compute::ComputeKernel;
pub(crate) use inbound::InboundKernel;
pub(crate) use outbound::OutboundKernel;

use std::time::{Duration, Instant};

use crate::error::StageFault;
use crate::program::StageId;

/// What one stage did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Stage
    pub stage: StageId,
    /// Chunks processed
    pub chunks: usize,
    /// Bytes moved (read for inbound, written for outbound, packed for compute)
    pub bytes: u64,
    /// Wall time from kernel start to completion
    pub elapsed: Duration,
    /// Chunk indices in processing order
    pub chunk_log: Vec<usize>,
}

impl StageReport {
    pub(crate) fn new(stage: StageId) -> Self {
        Self {
            stage,
            chunks: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
            chunk_log: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, index: usize, bytes: usize) {
        self.chunks += 1;
        self.bytes += bytes as u64;
        self.chunk_log.push(index);
    }
}

/// Shared per-run settings handed to every kernel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageContext {
    pub deadline: Option<Instant>,
    pub trace: bool,
}

/// A stage body runnable on a worker thread.
pub(crate) trait Kernel: Send {
    fn stage(&self) -> StageId;

    fn execute(self: Box<Self>) -> Result<StageReport, StageFault>;
}
