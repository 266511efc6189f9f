//! Outbound data mover: c2 → DRAM.

use parking_lot::RwLock;
use std::time::Instant;
use tracing::{debug, trace};

use super::{Kernel, StageContext, StageReport};
use crate::error::StageFault;
use crate::memory::MemoryTier;
use crate::program::{ChunkPlan, OutboundArgs, StageId};
use crate::queue::QueueConsumer;

pub(crate) struct OutboundKernel<'a> {
    pub args: OutboundArgs,
    pub plan: ChunkPlan,
    pub dram: &'a RwLock<MemoryTier>,
    pub c2: QueueConsumer,
    pub ctx: StageContext,
}

impl Kernel for OutboundKernel<'_> {
    fn stage(&self) -> StageId {
        StageId::Outbound
    }

    fn execute(self: Box<Self>) -> Result<StageReport, StageFault> {
        let Self {
            args,
            plan,
            dram,
            mut c2,
            ctx,
        } = *self;
        let start = Instant::now();
        let mut report = StageReport::new(StageId::Outbound);

        debug!("outbound: C@{:#x}, {} chunks", args.dst_addr, plan.chunks());

        for i in 0..plan.chunks() {
            let page = c2.wait(ctx.deadline)?;
            if page.len() != plan.chunk_bytes() {
                return Err(StageFault::memory(format!(
                    "chunk {i} carries {} bytes, expected {}",
                    page.len(),
                    plan.chunk_bytes()
                )));
            }

            let offset = plan.offset(i);
            dram.write().write(args.dst_addr + offset, page.bytes())?;
            let written = page.len();
            c2.release(page)?;

            if ctx.trace {
                trace!("outbound: chunk {i} written at +{offset:#x}");
            }
            report.record(i, written);
        }

        report.elapsed = start.elapsed();
        debug!("outbound: done in {:?}", report.elapsed);
        Ok(report)
    }
}
