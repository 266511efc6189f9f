//! End-to-end pipeline tests
//!
//! Every test runs the full three-stage pipeline on the software tile model;
//! no hardware is involved.

use std::time::Duration;

use wormflow_driver::{
    run_elementwise, BufferHandle, ComputeArgs, DeviceProfile, EltwiseOp, FnOp, InboundArgs,
    Orchestrator, OutboundArgs, PipelineError, RunOptions, RunState, StageFault, StageId,
    TierKind,
};

fn ramp_f32(n: usize) -> (Vec<f32>, Vec<f32>) {
    let a = (0..n).map(|i| i as f32).collect();
    let b = (0..n).map(|i| (n - i) as f32).collect();
    (a, b)
}

fn ramp_u32(n: u32) -> (Vec<u32>, Vec<u32>) {
    ((0..n).collect(), (0..n).map(|i| n - i).collect())
}

/// Allocate A, B, C for `n` f32 elements and stage the ramps.
fn prepare(orch: &mut Orchestrator<f32>, n: usize) -> (BufferHandle, BufferHandle, BufferHandle) {
    let (a, b) = ramp_f32(n);
    let bytes = (n * 4) as u64;
    let src_a = orch.allocate(TierKind::Dram, bytes, bytes).expect("allocate A");
    let src_b = orch.allocate(TierKind::Dram, bytes, bytes).expect("allocate B");
    let dst = orch.allocate(TierKind::Dram, bytes, bytes).expect("allocate C");
    orch.stage(&src_a, &a).expect("stage A");
    orch.stage(&src_b, &b).expect("stage B");
    (src_a, src_b, dst)
}

fn configure_all(
    orch: &mut Orchestrator<f32>,
    buffers: &(BufferHandle, BufferHandle, BufferHandle),
    elements: usize,
    chunk: usize,
) {
    let (src_a, src_b, dst) = buffers;
    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements,
            chunk,
        },
    )
    .expect("configure inbound");
    orch.configure(StageId::Compute, ComputeArgs { elements, chunk })
        .expect("configure compute");
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: dst.address(),
            elements,
            chunk,
        },
    )
    .expect("configure outbound");
}

#[test]
fn test_f32_add_256_by_64() {
    let (a, b) = ramp_f32(256);
    let run = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default(),
        &a,
        &b,
        EltwiseOp::Add,
    )
    .expect("pipeline run");

    assert_eq!(run.output.len(), 256);
    assert!(run.output.iter().all(|&c| c == 256.0));
    assert_eq!(run.verification.mismatches, 0);
    assert_eq!(
        run.verification.to_string(),
        "Completed successfully on the device, with 256 elements"
    );
    assert_eq!(run.report.chunks, 4);
}

#[test]
fn test_u32_add_256_by_64() {
    let (a, b) = ramp_u32(256);
    let run = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default(),
        &a,
        &b,
        EltwiseOp::Add,
    )
    .expect("pipeline run");

    assert!(run.output.iter().all(|&c| c == 256));
    assert!(run.verification.passed());
}

#[test]
fn test_single_chunk_matches_chunked() {
    let (a, b) = ramp_u32(64);
    let single = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(64),
        &a,
        &b,
        EltwiseOp::Mul,
    )
    .expect("single chunk run");
    let chunked = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(8),
        &a,
        &b,
        EltwiseOp::Mul,
    )
    .expect("chunked run");

    assert_eq!(single.report.chunks, 1);
    assert_eq!(chunked.report.chunks, 8);
    assert_eq!(single.output, chunked.output);
    assert!(single.verification.passed());
}

#[test]
fn test_chunk_not_dividing_elements_is_rejected_early() {
    let (a, b) = ramp_f32(256);
    let err = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(48),
        &a,
        &b,
        EltwiseOp::Add,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));

    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let err = orch
        .configure(StageId::Compute, ComputeArgs { elements: 256, chunk: 48 })
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert_eq!(orch.allocated_bytes(TierKind::Dram), 0);
    assert_eq!(orch.allocated_bytes(TierKind::L1), 0);
}

#[test]
fn test_chunk_larger_than_page_is_rejected() {
    let (a, b) = ramp_u32(2048);
    let err = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(2048),
        &a,
        &b,
        EltwiseOp::Add,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
}

#[test]
fn test_every_stage_handles_each_chunk_once_in_order() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let buffers = prepare(&mut orch, 1024);
    configure_all(&mut orch, &buffers, 1024, 128);

    let report = orch.run().expect("run");
    for stage in StageId::ALL {
        let s = report.stage(stage).expect("stage report");
        assert_eq!(s.chunks, 8, "{stage} chunk count");
        assert_eq!(s.chunk_log, (0..8).collect::<Vec<_>>(), "{stage} order");
    }
    assert_eq!(report.stage(StageId::Inbound).unwrap().bytes, 2 * 4096);
    assert_eq!(report.stage(StageId::Outbound).unwrap().bytes, 4096);
    for q in &report.queues {
        assert_eq!(q.committed, 8);
        assert_eq!(q.released, 8);
        assert!(q.high_water <= 1);
    }
    assert_eq!(report.dram_bytes(), 3 * 4096);
    orch.release();
}

#[test]
fn test_deeper_queues_bound_in_flight_chunks() {
    let (a, b) = ramp_u32(4096);
    let options = RunOptions::default().with_chunk(64).with_queue_pages(4);
    let run = run_elementwise(&DeviceProfile::default(), options, &a, &b, EltwiseOp::Add)
        .expect("pipeline run");

    assert!(run.verification.passed());
    assert_eq!(run.report.queue_pages, 4);
    for q in &run.report.queues {
        assert_eq!(q.capacity, 4);
        assert_eq!(q.committed, 64);
        assert!(q.high_water <= 4, "c{} held {} pages", q.index, q.high_water);
    }
}

#[test]
fn test_queue_regions_must_fit_l1() {
    let profile = DeviceProfile::WORMHOLE.with_l1_bytes(TierKind::L1.reserved() + 512);
    let mut orch = Orchestrator::<f32>::new(profile, EltwiseOp::Add);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);

    let err = orch.run().unwrap_err();
    match err {
        PipelineError::Allocation { tier, requested, .. } => {
            assert_eq!(tier, TierKind::L1);
            assert_eq!(requested, 256);
        }
        other => panic!("expected an L1 allocation failure, got {other}"),
    }
    assert_eq!(orch.allocated_bytes(TierKind::L1), 0, "partial queue regions rolled back");
    assert_eq!(orch.state(), RunState::Idle);
}

#[test]
fn test_queue_regions_freed_after_run() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);

    let first = orch.run().expect("first run");
    assert_eq!(orch.allocated_bytes(TierKind::L1), 0);
    let second = orch.run().expect("second run");
    assert_eq!(first.chunks, second.chunks);
    assert!(orch.retrieve(&buffers.2).expect("retrieve").iter().all(|&c| c == 256.0));
}

#[test]
fn test_integer_arithmetic_wraps() {
    let a = vec![i32::MIN; 64];
    let b = vec![1i32; 64];
    let run = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(16),
        &a,
        &b,
        EltwiseOp::Sub,
    )
    .expect("pipeline run");
    assert!(run.output.iter().all(|&c| c == i32::MAX));

    let a = vec![u32::MAX; 32];
    let b = vec![2u32; 32];
    let run = run_elementwise(
        &DeviceProfile::default(),
        RunOptions::default().with_chunk(32),
        &a,
        &b,
        EltwiseOp::Add,
    )
    .expect("pipeline run");
    assert!(run.output.iter().all(|&c| c == 1));
}

#[test]
fn test_custom_operator() {
    let (a, b) = ramp_u32(128);
    let max = FnOp::new("max", |x: u32, y: u32| x.max(y));
    let run = run_elementwise(&DeviceProfile::default(), RunOptions::default(), &a, &b, max)
        .expect("pipeline run");

    assert_eq!(run.report.op, "max");
    assert_eq!(run.output[0], 128);
    assert_eq!(run.output[127], 127);
    assert!(run.verification.passed());
}

#[test]
fn test_small_register_bank() {
    let (a, b) = ramp_f32(512);
    let profile = DeviceProfile::WORMHOLE.with_register_segments(1);
    let run = run_elementwise(&profile, RunOptions::default(), &a, &b, EltwiseOp::Add)
        .expect("pipeline run");
    assert!(run.verification.passed());
}

#[test]
fn test_stalled_run_times_out() {
    let (a, b) = ramp_u32(4);
    let slow = FnOp::new("slow", |x: u32, y: u32| {
        std::thread::sleep(Duration::from_millis(200));
        x + y
    });
    let options = RunOptions::default()
        .with_chunk(1)
        .with_timeout(Some(Duration::from_millis(50)));

    let err = run_elementwise(&DeviceProfile::default(), options, &a, &b, slow).unwrap_err();
    match err {
        PipelineError::Launch { stage, fault } => {
            assert!(matches!(fault, StageFault::Timeout { .. }), "fault: {fault}");
            assert_ne!(stage, StageId::Compute);
        }
        other => panic!("expected a launch failure, got {other}"),
    }
}

#[test]
fn test_stage_panic_fails_run_with_stage_label() {
    let (a, b) = ramp_u32(256);
    let boom = FnOp::new("boom", |_x: u32, _y: u32| -> u32 { panic!("operator exploded") });

    let mut orch = Orchestrator::<u32, _>::new(DeviceProfile::default(), boom);
    let src_a = orch.allocate(TierKind::Dram, 1024, 256).expect("allocate A");
    let src_b = orch.allocate(TierKind::Dram, 1024, 256).expect("allocate B");
    let dst = orch.allocate(TierKind::Dram, 1024, 256).expect("allocate C");
    orch.stage(&src_a, &a).expect("stage A");
    orch.stage(&src_b, &b).expect("stage B");
    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements: 256,
            chunk: 64,
        },
    )
    .expect("configure inbound");
    orch.configure(StageId::Compute, ComputeArgs { elements: 256, chunk: 64 })
        .expect("configure compute");
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: dst.address(),
            elements: 256,
            chunk: 64,
        },
    )
    .expect("configure outbound");

    let err = orch.run().unwrap_err();
    assert_eq!(err.failed_stage(), Some(StageId::Compute));
    match err {
        PipelineError::Launch { fault, .. } => assert_eq!(
            fault,
            StageFault::Panicked {
                message: "operator exploded".to_string()
            }
        ),
        other => panic!("expected a launch failure, got {other}"),
    }
    assert_eq!(orch.state(), RunState::Failed);
    assert!(matches!(orch.retrieve(&dst), Err(PipelineError::InvalidState { .. })));
}

#[test]
fn test_retrieve_requires_completed_run() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let (_, _, dst) = prepare(&mut orch, 64);
    assert!(matches!(orch.retrieve(&dst), Err(PipelineError::InvalidState { .. })));
}

#[test]
fn test_host_transfer_validation() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let buf = orch.allocate(TierKind::Dram, 256, 256).expect("allocate");

    let err = orch.stage(&buf, &[1.0; 63]).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::SizeMismatch {
            expected: 64,
            actual: 63
        }
    ));

    let l1 = orch.allocate(TierKind::L1, 256, 256).expect("allocate L1");
    assert!(matches!(
        orch.stage(&l1, &[0.0; 64]),
        Err(PipelineError::Transfer { .. })
    ));
}

#[test]
fn test_retrieve_into_checks_length() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);
    orch.run().expect("run");

    let mut short = vec![0.0f32; 255];
    assert!(matches!(
        orch.retrieve_into(&buffers.2, &mut short),
        Err(PipelineError::SizeMismatch { .. })
    ));
    let mut out = vec![0.0f32; 256];
    orch.retrieve_into(&buffers.2, &mut out).expect("retrieve");
    assert!(out.iter().all(|&c| c == 256.0));
}

#[test]
fn test_run_requires_all_stages() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let (src_a, src_b, _) = prepare(&mut orch, 256);
    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements: 256,
            chunk: 64,
        },
    )
    .expect("configure inbound");

    let err = orch.run().unwrap_err();
    assert!(err.to_string().contains("compute, outbound"), "{err}");
}

#[test]
fn test_addresses_must_resolve_to_buffers() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: 0x7_0000,
            elements: 256,
            chunk: 64,
        },
    )
    .expect("configure outbound");

    assert!(matches!(orch.run(), Err(PipelineError::Configuration { .. })));
}

#[test]
fn test_release_is_idempotent() {
    let mut orch = Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let (src_a, _, _) = prepare(&mut orch, 64);
    orch.release();
    orch.release();

    assert_eq!(orch.allocated_bytes(TierKind::Dram), 0);
    assert!(matches!(
        orch.stage(&src_a, &[0.0; 64]),
        Err(PipelineError::Transfer { .. })
    ));
    assert!(matches!(
        orch.allocate(TierKind::Dram, 64, 64),
        Err(PipelineError::InvalidState { .. })
    ));
}

#[test]
fn test_result_may_overwrite_operand() {
    let options = RunOptions::default().with_queue_pages(2);
    let mut orch =
        Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Sub).with_options(options);
    let (src_a, src_b, _) = prepare(&mut orch, 256);
    configure_all(&mut orch, &(src_a, src_b, src_a), 256, 32);

    let report = orch.run().expect("in-place run");
    assert_eq!(report.chunks, 8);

    let (a, b) = ramp_f32(256);
    let c = orch.retrieve(&src_a).expect("retrieve A");
    for i in 0..256 {
        assert_eq!(c[i], a[i] - b[i], "element {i}");
    }
    assert_eq!(orch.retrieve(&src_b).expect("retrieve B"), b);
}

#[test]
fn test_retrieve_into_skips_trailing_bytes() {
    let mut orch = Orchestrator::<u32>::new(DeviceProfile::default(), EltwiseOp::Add);
    let (a, b) = ramp_u32(64);
    let src_a = orch.allocate(TierKind::Dram, 256, 256).expect("allocate A");
    let src_b = orch.allocate(TierKind::Dram, 256, 256).expect("allocate B");
    let dst = orch.allocate(TierKind::Dram, 258, 1).expect("allocate C");
    orch.stage(&src_a, &a).expect("stage A");
    orch.stage(&src_b, &b).expect("stage B");
    orch.configure(
        StageId::Inbound,
        InboundArgs {
            src_a_addr: src_a.address(),
            src_b_addr: src_b.address(),
            elements: 64,
            chunk: 16,
        },
    )
    .expect("configure inbound");
    orch.configure(StageId::Compute, ComputeArgs { elements: 64, chunk: 16 })
        .expect("configure compute");
    orch.configure(
        StageId::Outbound,
        OutboundArgs {
            dst_addr: dst.address(),
            elements: 64,
            chunk: 16,
        },
    )
    .expect("configure outbound");
    orch.run().expect("run");

    let mut out = vec![0u32; 64];
    orch.retrieve_into(&dst, &mut out).expect("retrieve");
    assert!(out.iter().all(|&c| c == 64));
    assert_eq!(orch.retrieve(&dst).expect("retrieve").len(), 64);
}

#[test]
fn test_huge_timeout_means_no_deadline() {
    let options = RunOptions::default().with_timeout(Some(Duration::MAX));
    let mut orch =
        Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add).with_options(options);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);

    orch.run().expect("run without a reachable deadline");
    assert_eq!(orch.state(), RunState::Completed);
}

#[test]
fn test_oversized_queue_depth_is_rejected() {
    let options = RunOptions::default().with_queue_pages(usize::MAX / 8);
    let mut orch =
        Orchestrator::<f32>::new(DeviceProfile::default(), EltwiseOp::Add).with_options(options);
    let buffers = prepare(&mut orch, 256);
    configure_all(&mut orch, &buffers, 256, 64);

    assert!(matches!(orch.run(), Err(PipelineError::Configuration { .. })));
    assert_eq!(orch.allocated_bytes(TierKind::L1), 0);
}
