//! One-call host flow for a binary elementwise operation.

use tracing::info;
use wormflow_chip::tiers::TierKind;

use crate::config::RunOptions;
use crate::element::Element;
use crate::error::{PipelineError, Result};
use crate::op::BinaryOp;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::profile::DeviceProfile;
use crate::program::{ChunkPlan, ComputeArgs, InboundArgs, OutboundArgs, StageId};
use crate::verify::{reference, verify, Verification};

/// Output of [`run_elementwise`].
#[derive(Debug, Clone)]
pub struct ElementwiseRun<E> {
    /// Device result
    pub output: Vec<E>,
    /// Run report
    pub report: RunReport,
    /// Comparison with the host reference
    pub verification: Verification,
}

/// Compute `op(a[i], b[i])` on the pipeline and check it against the host.
///
/// Validates the chunk plan, allocates A, B and C in DRAM, stages the
/// operands, binds all three stages, runs, reads C back and releases the
/// device on every path.
///
/// ```
/// use wormflow_driver::{run_elementwise, DeviceProfile, EltwiseOp, RunOptions};
///
/// let a: Vec<u32> = (0..256).collect();
/// let b: Vec<u32> = (0..256).map(|i| 256 - i).collect();
/// let run = run_elementwise(
///     &DeviceProfile::default(),
///     RunOptions::default(),
///     &a,
///     &b,
///     EltwiseOp::Add,
/// )
/// .unwrap();
/// assert!(run.output.iter().all(|&c| c == 256));
/// assert!(run.verification.passed());
/// ```
///
/// # Errors
///
/// `SizeMismatch` if `a` and `b` differ in length, `Configuration` for an
/// inadmissible chunk size (before anything is allocated), and any error
/// of the underlying orchestrator calls.
pub fn run_elementwise<E, O>(
    profile: &DeviceProfile,
    options: RunOptions,
    a: &[E],
    b: &[E],
    op: O,
) -> Result<ElementwiseRun<E>>
where
    E: Element,
    O: BinaryOp<E>,
{
    if a.len() != b.len() {
        return Err(PipelineError::SizeMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let plan = ChunkPlan::new(a.len(), options.chunk, E::FORMAT, profile.page_capacity_bytes)?;

    let mut orch = Orchestrator::new(profile.clone(), op).with_options(options);
    let outcome = drive(&mut orch, &plan, a, b);
    orch.release();
    let (output, report) = outcome?;

    let expected = reference(a, b, orch.op());
    let verification = verify(&output, &expected);
    info!("{verification}");

    Ok(ElementwiseRun {
        output,
        report,
        verification,
    })
}

fn drive<E, O>(
    orch: &mut Orchestrator<E, O>,
    plan: &ChunkPlan,
    a: &[E],
    b: &[E],
) -> Result<(Vec<E>, RunReport)>
where
    E: Element,
    O: BinaryOp<E>,
{
    let size = plan.total_bytes() as u64;
    let page = plan.chunk_bytes() as u64;

    let src_a = orch.allocate(TierKind::Dram, size, page)?;
    let src_b = orch.allocate(TierKind::Dram, size, page)?;
    let dst = orch.allocate(TierKind::Dram, size, page)?;
    orch.stage(&src_a, a)?;
    orch.stage(&src_b, b)?;

    let (elements, chunk) = (plan.elements(), plan.chunk());
    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements,
            chunk,
        },
    )?;
    orch.configure(StageId::Compute, ComputeArgs { elements, chunk })?;
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: dst.address(),
            elements,
            chunk,
        },
    )?;

    let report = orch.run()?;
    let output = orch.retrieve(&dst)?;
    Ok((output, report))
}
