//! Compute stage: unpack c0/c1 into a register segment, apply the operator,
//! pack into c2.

use std::time::Instant;
use tracing::{debug, trace};

use super::{Kernel, StageContext, StageReport};
use crate::element::Element;
use crate::error::StageFault;
use crate::op::BinaryOp;
use crate::program::{ComputeArgs, ChunkPlan, StageId};
use crate::queue::{QueueConsumer, QueueProducer};
use crate::registers::RegisterBank;

pub(crate) struct ComputeKernel<'a, E: Element, O: ?Sized> {
    pub args: ComputeArgs,
    pub plan: ChunkPlan,
    pub bank: &'a RegisterBank<E>,
    pub op: &'a O,
    pub c0: QueueConsumer,
    pub c1: QueueConsumer,
    pub c2: QueueProducer,
    pub ctx: StageContext,
}

impl<E, O> Kernel for ComputeKernel<'_, E, O>
where
    E: Element,
    O: BinaryOp<E> + ?Sized,
{
    fn stage(&self) -> StageId {
        StageId::Compute
    }

    fn execute(self: Box<Self>) -> Result<StageReport, StageFault> {
        let Self {
            args,
            plan,
            bank,
            op,
            mut c0,
            mut c1,
            mut c2,
            ctx,
        } = *self;
        let start = Instant::now();
        let mut report = StageReport::new(StageId::Compute);

        debug!(
            "compute: {} over N={} K={} ({}), {} register segments",
            op.name(),
            args.elements,
            args.chunk,
            E::FORMAT,
            bank.segments()
        );

        for i in 0..plan.chunks() {
            let lhs = c0.wait(ctx.deadline)?;
            let rhs = c1.wait(ctx.deadline)?;

            let mut segment = bank.acquire(ctx.deadline)?;
            segment.load(lhs.bytes())?;
            segment.apply(rhs.bytes(), op)?;
            segment.commit();

            c0.release(lhs)?;
            c1.release(rhs)?;

            let mut out = c2.reserve(ctx.deadline)?;
            segment.wait();
            segment.pack_into(&mut out);
            let seg_index = segment.index();
            drop(segment);

            let packed = out.len();
            c2.commit(out)?;

            if ctx.trace {
                trace!("compute: chunk {i} via segment {seg_index}");
            }
            report.record(i, packed);
        }

        report.elapsed = start.elapsed();
        debug!("compute: done in {:?}", report.elapsed);
        Ok(report)
    }
}
