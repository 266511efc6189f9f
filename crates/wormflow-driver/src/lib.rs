//! Streaming elementwise pipeline over a simulated Tensix tile.
//!
//! Two operand arrays in off-chip DRAM are streamed chunk by chunk through
//! three concurrently running stages and written back as a result array:
//!
//! ```text
//!              ┌─────────┐  c0  ┌─────────┐  c2  ┌──────────┐
//!   DRAM A ───►│ inbound │─────►│ compute │─────►│ outbound │───► DRAM C
//!   DRAM B ───►│ (BRISC) │─────►│ (TRISC) │      │ (NCRISC) │
//!              └─────────┘  c1  └─────────┘      └──────────┘
//! ```
//!
//! Stages exchange data only through bounded handoff queues of L1 pages, so
//! a slow stage back-pressures the others and at most `queue_pages` chunks
//! are in flight per queue.
//!
//! # Quick start
//!
//! ```
//! use wormflow_driver::prelude::*;
//! use wormflow_driver::TierKind;
//!
//! # fn main() -> Result<()> {
//! let a: Vec<f32> = (0..256).map(|i| i as f32).collect();
//! let b: Vec<f32> = (0..256).map(|i| (256 - i) as f32).collect();
//!
//! let mut orch = Orchestrator::new(DeviceProfile::default(), EltwiseOp::Add);
//! let src_a = orch.allocate(TierKind::Dram, 1024, 256)?;
//! let src_b = orch.allocate(TierKind::Dram, 1024, 256)?;
//! let dst = orch.allocate(TierKind::Dram, 1024, 256)?;
//! orch.stage(&src_a, &a)?;
//! orch.stage(&src_b, &b)?;
//!
//! let (elements, chunk) = (256, 64);
//! orch.configure(StageId::Inbound, InboundArgs {
//!     src_a_addr: src_a.address(),
//!     src_b_addr: src_b.address(),
//!     elements,
//!     chunk,
//! })?;
//! orch.configure(StageId::Compute, ComputeArgs { elements, chunk })?;
//! orch.configure(StageId::Outbound, OutboundArgs { dst_addr: dst.address(), elements, chunk })?;
//!
//! let report = orch.run()?;
//! assert_eq!(report.chunks, 4);
//! assert!(orch.retrieve(&dst)?.iter().all(|&c| c == 256.0));
//! orch.release();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod config;
mod element;
mod elementwise;
mod error;
mod memory;
mod op;
mod orchestrator;
mod profile;
mod program;
pub mod queue;
pub mod registers;
mod stages;
mod verify;

pub use wormflow_chip::format::DataFormat;
pub use wormflow_chip::tiers::TierKind;

pub use config::{
    Diagnostics, PipelineConfig, RunOptions, RunSection, DEFAULT_CHUNK, DEFAULT_RUN_TIMEOUT,
};
pub use element::Element;
pub use elementwise::{run_elementwise, ElementwiseRun};
pub use error::{PipelineError, Result, StageFault};
pub use memory::{AccessError, BufferHandle, MemoryTier};
pub use op::{BinaryOp, EltwiseOp, FnOp};
pub use orchestrator::{Orchestrator, RunReport, RunState};
pub use profile::DeviceProfile;
pub use program::{ChunkPlan, ComputeArgs, InboundArgs, OutboundArgs, StageArgs, StageId};
pub use queue::QueueStats;
pub use stages::StageReport;
pub use verify::{reference, verify, Verification};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        run_elementwise, BinaryOp, ComputeArgs, DeviceProfile, EltwiseOp, Element, InboundArgs,
        Orchestrator, OutboundArgs, PipelineError, Result, RunOptions, RunReport, StageId,
    };
}
