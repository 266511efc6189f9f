//! Host program for `C = A + B` over 256 floats in chunks of 64.
//!
//! Walks the orchestrator API step by step instead of `run_elementwise`.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example eltwise_add

use tracing_subscriber::EnvFilter;
use wormflow_driver::prelude::*;
use wormflow_driver::{verify, Diagnostics, TierKind};

const ELEMENTS: usize = 256;
const CHUNK: usize = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let a: Vec<f32> = (0..ELEMENTS).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..ELEMENTS).map(|i| (ELEMENTS - i) as f32).collect();

    let options = RunOptions::default().with_diagnostics(Diagnostics::ALL);
    let mut orch =
        Orchestrator::new(DeviceProfile::default(), EltwiseOp::Add).with_options(options);

    let bytes = (ELEMENTS * 4) as u64;
    let page = (CHUNK * 4) as u64;
    let src_a = orch.allocate(TierKind::Dram, bytes, page)?;
    let src_b = orch.allocate(TierKind::Dram, bytes, page)?;
    let dst = orch.allocate(TierKind::Dram, bytes, page)?;
    orch.stage(&src_a, &a)?;
    orch.stage(&src_b, &b)?;

    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements: ELEMENTS,
            chunk: CHUNK,
        },
    )?;
    orch.configure(StageId::Compute, ComputeArgs { elements: ELEMENTS, chunk: CHUNK })?;
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: dst.address(),
            elements: ELEMENTS,
            chunk: CHUNK,
        },
    )?;

    let report = orch.run()?;
    let c = orch.retrieve(&dst)?;
    orch.release();

    let expected = vec![ELEMENTS as f32; ELEMENTS];
    println!("{}", verify(&c, &expected));
    println!("{} chunks in {:?}", report.chunks, report.elapsed);
    Ok(())
}
