//! Inbound data mover: DRAM → c0 (operand A), c1 (operand B).

use parking_lot::RwLock;
use std::time::Instant;
use tracing::{debug, trace};

use super::{Kernel, StageContext, StageReport};
use crate::error::StageFault;
use crate::memory::MemoryTier;
use crate::program::{ChunkPlan, InboundArgs, StageId};
use crate::queue::QueueProducer;

pub(crate) struct InboundKernel<'a> {
    pub args: InboundArgs,
    pub plan: ChunkPlan,
    pub dram: &'a RwLock<MemoryTier>,
    pub c0: QueueProducer,
    pub c1: QueueProducer,
    pub ctx: StageContext,
}

impl Kernel for InboundKernel<'_> {
    fn stage(&self) -> StageId {
        StageId::Inbound
    }

    fn execute(self: Box<Self>) -> Result<StageReport, StageFault> {
        let Self {
            args,
            plan,
            dram,
            mut c0,
            mut c1,
            ctx,
        } = *self;
        let start = Instant::now();
        let mut report = StageReport::new(StageId::Inbound);
        let chunk_bytes = plan.chunk_bytes();

        debug!(
            "inbound: A@{:#x} B@{:#x}, {} chunks of {} bytes",
            args.src_a_addr,
            args.src_b_addr,
            plan.chunks(),
            chunk_bytes
        );

        for i in 0..plan.chunks() {
            let offset = plan.offset(i);
            let mut page_a = c0.reserve(ctx.deadline)?;
            let mut page_b = c1.reserve(ctx.deadline)?;
            {
                let dram = dram.read();
                page_a.write(dram.read(args.src_a_addr + offset, chunk_bytes)?);
                page_b.write(dram.read(args.src_b_addr + offset, chunk_bytes)?);
            }
            c0.commit(page_a)?;
            c1.commit(page_b)?;

            if ctx.trace {
                trace!("inbound: chunk {i} read at +{offset:#x}");
            }
            report.record(i, 2 * chunk_bytes);
        }

        report.elapsed = start.elapsed();
        debug!("inbound: done in {:?}", report.elapsed);
        Ok(report)
    }
}
