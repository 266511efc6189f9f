//! Host-side pipeline orchestrator.
//!
//! The orchestrator owns the device model of one compute tile: the DRAM bank,
//! the tile's L1, and the three stage kernels. A run follows the host flow of
//! a device program:
//!
//! ```text
//! allocate ─► stage ─► configure ×3 ─► run ─► retrieve ─► release
//! ```
//!
//! `run()` launches all three stages jointly on scoped threads and returns
//! only after every one of them has finished.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wormflow_chip::format::DataFormat;
use wormflow_chip::tiers::TierKind;
use wormflow_chip::tile::cb;

use crate::config::RunOptions;
use crate::element::{decode, encode, Element};
use crate::error::{PipelineError, Result, StageFault};
use crate::memory::{new_handle, BufferHandle, MemoryTier};
use crate::op::{BinaryOp, EltwiseOp};
use crate::profile::DeviceProfile;
use crate::program::{Bindings, ChunkPlan, Program, StageArgs, StageId};
use crate::queue::{handoff_queue, QueueMonitor, QueueStats};
use crate::registers::RegisterBank;
use crate::stages::{
    ComputeKernel, InboundKernel, Kernel, OutboundKernel, StageContext, StageReport,
};

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Buffers and stages may be set up; no result to read
    Idle,
    /// Last run succeeded; results may be retrieved
    Completed,
    /// Last run failed
    Failed,
    /// All resources freed
    Released,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Released => "released",
        })
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Elements per array (N)
    pub elements: usize,
    /// Elements per chunk (K)
    pub chunk: usize,
    /// Chunks per array (N/K)
    pub chunks: usize,
    /// Element format
    pub format: DataFormat,
    /// Operator name
    pub op: String,
    /// Pages per handoff queue
    pub queue_pages: usize,
    /// Per-stage reports, in pipeline order
    pub stages: Vec<StageReport>,
    /// Per-queue counters (c0, c1, c2)
    pub queues: Vec<QueueStats>,
    /// Wall time of the launch
    pub elapsed: Duration,
}

impl RunReport {
    /// Report of one stage
    pub fn stage(&self, id: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == id)
    }

    /// Bytes crossing the DRAM interface (two operands in, one result out)
    pub fn dram_bytes(&self) -> u64 {
        (3 * self.elements * self.format.size_bytes()) as u64
    }

    /// DRAM-side throughput of the run in MB/s
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput_mb_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.dram_bytes() as f64 / secs / 1_000_000.0
        } else {
            0.0
        }
    }
}

/// Drives one three-stage pipeline over elements of type `E`.
///
/// `O` is the operator applied by the compute stage.
#[derive(Debug)]
pub struct Orchestrator<E: Element, O = EltwiseOp> {
    profile: DeviceProfile,
    options: RunOptions,
    op: O,
    dram: RwLock<MemoryTier>,
    l1: MemoryTier,
    buffers: BTreeMap<u32, BufferHandle>,
    bindings: Bindings,
    state: RunState,
    next_id: u32,
    _element: PhantomData<fn() -> E>,
}

impl<E: Element, O: BinaryOp<E>> Orchestrator<E, O> {
    /// Create an orchestrator over a fresh device with default run options.
    pub fn new(profile: DeviceProfile, op: O) -> Self {
        debug!(
            "orchestrator: {} elements, DRAM {} bytes, L1 {} bytes, op {}",
            E::FORMAT,
            profile.dram_bytes,
            profile.l1_bytes,
            op.name()
        );
        Self {
            dram: RwLock::new(MemoryTier::new(TierKind::Dram, profile.dram_bytes)),
            l1: MemoryTier::new(TierKind::L1, profile.l1_bytes),
            profile,
            options: RunOptions::default(),
            op,
            buffers: BTreeMap::new(),
            bindings: Bindings::default(),
            state: RunState::Idle,
            next_id: 0,
            _element: PhantomData,
        }
    }

    /// Replace the run options
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Operator applied by the compute stage
    pub const fn op(&self) -> &O {
        &self.op
    }

    /// Run options in effect
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Allocate a buffer of `size` bytes split into pages of `page_size`.
    ///
    /// # Errors
    ///
    /// `Configuration` for a zero size or a page size that does not divide
    /// it, `Allocation` if the tier has no room, `InvalidState` after
    /// release.
    pub fn allocate(&mut self, tier: TierKind, size: u64, page_size: u64) -> Result<BufferHandle> {
        self.ensure_live("allocate")?;
        if size == 0 {
            return Err(PipelineError::configuration("buffer size must be positive"));
        }
        if page_size == 0 || size % page_size != 0 {
            return Err(PipelineError::configuration(format!(
                "page size {page_size} does not divide buffer size {size}"
            )));
        }

        let id = self.next_buffer_id();
        let address = match tier {
            TierKind::Dram => self.dram.get_mut().allocate(id, size)?,
            TierKind::L1 => self.l1.allocate(id, size)?,
        };
        let handle = new_handle(id, tier, address, size, page_size);
        self.buffers.insert(id, handle);
        info!("Allocated buffer {id}: {size} bytes in {tier} at {address:#x}");
        Ok(handle)
    }

    /// Copy host data into a DRAM buffer.
    ///
    /// # Errors
    ///
    /// `Transfer` for an unknown, released or on-chip buffer, `SizeMismatch`
    /// if `data` does not have exactly the buffer's element count.
    pub fn stage(&mut self, buffer: &BufferHandle, data: &[E]) -> Result<()> {
        let handle = self.resolve_host_buffer(buffer)?;
        let expected = handle.elements::<E>();
        if data.len() != expected {
            return Err(PipelineError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.dram.get_mut().write(handle.address(), encode(data))?;
        self.state = RunState::Idle;
        debug!("Staged {} elements into buffer {}", data.len(), handle.id());
        Ok(())
    }

    /// Bind runtime arguments to a stage.
    ///
    /// N and K are validated here; nothing on the device is touched.
    ///
    /// # Errors
    ///
    /// `Configuration` if the arguments belong to another stage or the chunk
    /// shape is not admissible, `InvalidState` after release.
    pub fn configure(&mut self, stage: StageId, args: impl Into<StageArgs>) -> Result<()> {
        self.ensure_live("configure")?;
        let args = args.into();
        if args.stage() != stage {
            return Err(PipelineError::configuration(format!(
                "{} arguments bound to the {stage} stage",
                args.stage()
            )));
        }
        ChunkPlan::new(
            args.elements(),
            args.chunk(),
            E::FORMAT,
            self.profile.page_capacity_bytes,
        )?;
        debug!("Configured {stage} on {}: {:?}", stage.core(), args.to_words());
        self.bindings.bind(args);
        self.state = RunState::Idle;
        Ok(())
    }

    /// Launch all three stages and wait for them to finish.
    ///
    /// # Errors
    ///
    /// `Configuration` for incomplete or inconsistent bindings or addresses
    /// that do not resolve to large enough DRAM buffers, `Allocation` if the
    /// queues do not fit in L1, `Launch` if any stage fails or the run
    /// deadline expires.
    pub fn run(&mut self) -> Result<RunReport> {
        self.ensure_live("run")?;
        let program = self
            .bindings
            .complete(E::FORMAT, self.profile.page_capacity_bytes)?;
        let plan = program.plan;
        self.check_operand(program.inbound.src_a_addr, "operand A", &plan)?;
        self.check_operand(program.inbound.src_b_addr, "operand B", &plan)?;
        self.check_operand(program.outbound.dst_addr, "result", &plan)?;

        let pages = self.options.queue_pages;
        if pages == 0 {
            return Err(PipelineError::configuration("queue_pages must be positive"));
        }
        if self.profile.register_segments == 0 {
            return Err(PipelineError::configuration("device has no register segments"));
        }

        let queue_regions = self.allocate_queue_regions(pages, plan.chunk_bytes())?;
        let outcome = self.launch(&program);
        for address in queue_regions {
            self.l1.free(address);
        }

        match outcome {
            Ok(report) => {
                self.state = RunState::Completed;
                info!(
                    "Run completed: {} chunks of {} {} elements in {:?}",
                    report.chunks, report.chunk, report.format, report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                self.state = RunState::Failed;
                warn!("Run failed: {e}");
                Err(e)
            }
        }
    }

    fn launch(&self, program: &Program) -> Result<RunReport> {
        let plan = program.plan;
        let pages = self.options.queue_pages;
        let chunk_bytes = plan.chunk_bytes();

        let (c0_tx, c0_rx) = handoff_queue(cb::IN0, pages, chunk_bytes);
        let (c1_tx, c1_rx) = handoff_queue(cb::IN1, pages, chunk_bytes);
        let (c2_tx, c2_rx) = handoff_queue(cb::OUT0, pages, chunk_bytes);
        let monitors: [QueueMonitor; 3] = [c0_tx.monitor(), c1_tx.monitor(), c2_tx.monitor()];
        let bank = RegisterBank::<E>::new(self.profile.register_segments, plan.chunk());

        let start = Instant::now();
        // A deadline past the end of `Instant` is the same as none.
        let deadline = self.options.timeout.and_then(|t| start.checked_add(t));
        let ctx = |stage| StageContext {
            deadline,
            trace: self.options.diagnostics.for_stage(stage),
        };

        let kernels: Vec<Box<dyn Kernel + '_>> = vec![
            Box::new(InboundKernel {
                args: program.inbound,
                plan,
                dram: &self.dram,
                c0: c0_tx,
                c1: c1_tx,
                ctx: ctx(StageId::Inbound),
            }),
            Box::new(ComputeKernel {
                args: program.compute,
                plan,
                bank: &bank,
                op: &self.op,
                c0: c0_rx,
                c1: c1_rx,
                c2: c2_tx,
                ctx: ctx(StageId::Compute),
            }),
            Box::new(OutboundKernel {
                args: program.outbound,
                plan,
                dram: &self.dram,
                c2: c2_rx,
                ctx: ctx(StageId::Outbound),
            }),
        ];

        info!(
            "Launching {} chunks of {} ({} pages per queue, timeout {:?})",
            plan.chunks(),
            plan.chunk(),
            pages,
            self.options.timeout
        );
        let outcomes = run_kernels(kernels);
        let elapsed = start.elapsed();

        let mut stages = Vec::with_capacity(outcomes.len());
        let mut faults = Vec::new();
        for (stage, result, finished) in outcomes {
            match result {
                Ok(report) => stages.push(report),
                Err(fault) => {
                    warn!("{stage} stage ({}) failed: {fault}", stage.core());
                    faults.push((stage, fault, finished));
                }
            }
        }

        if let Some((stage, fault)) = primary_fault(faults) {
            return Err(PipelineError::Launch { stage, fault });
        }

        Ok(RunReport {
            elements: plan.elements(),
            chunk: plan.chunk(),
            chunks: plan.chunks(),
            format: E::FORMAT,
            op: self.op.name().to_string(),
            queue_pages: pages,
            stages,
            queues: monitors.iter().map(QueueMonitor::stats).collect(),
            elapsed,
        })
    }
}

impl<E: Element, O> Orchestrator<E, O> {
    /// Device profile in use
    pub const fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Current lifecycle state
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Bytes currently allocated in a tier
    pub fn allocated_bytes(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Dram => self.dram.read().used_bytes(),
            TierKind::L1 => self.l1.used_bytes(),
        }
    }

    /// Copy a DRAM buffer back to the host.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the last run succeeded, `Transfer` for an
    /// unknown or on-chip buffer.
    pub fn retrieve(&self, buffer: &BufferHandle) -> Result<Vec<E>> {
        let handle = self.resolve_result_buffer(buffer)?;
        let dram = self.dram.read();
        #[allow(clippy::cast_possible_truncation)]
        let bytes = dram.read(handle.address(), handle.size() as usize)?;
        Ok(decode(bytes))
    }

    /// Copy a DRAM buffer back into a host slice of exactly its length.
    ///
    /// # Errors
    ///
    /// As [`Self::retrieve`], plus `SizeMismatch` if `out` has the wrong
    /// length.
    pub fn retrieve_into(&self, buffer: &BufferHandle, out: &mut [E]) -> Result<()> {
        let handle = self.resolve_result_buffer(buffer)?;
        let expected = handle.elements::<E>();
        if out.len() != expected {
            return Err(PipelineError::SizeMismatch {
                expected,
                actual: out.len(),
            });
        }
        // Trailing bytes past the last whole element are not copied.
        let dram = self.dram.read();
        let bytes = dram.read(handle.address(), expected * E::SIZE)?;
        bytemuck::cast_slice_mut::<E, u8>(out).copy_from_slice(bytes);
        Ok(())
    }

    /// Free every buffer and forget all bindings. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.state == RunState::Released {
            return;
        }
        let count = self.buffers.len();
        self.dram.get_mut().clear();
        self.l1.clear();
        self.buffers.clear();
        self.bindings = Bindings::default();
        self.state = RunState::Released;
        info!("Released {count} buffers");
    }

    fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.state == RunState::Released {
            return Err(PipelineError::invalid_state(format!(
                "{operation} after release"
            )));
        }
        Ok(())
    }

    fn next_buffer_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn resolve_host_buffer(&self, buffer: &BufferHandle) -> Result<BufferHandle> {
        let handle = self
            .buffers
            .get(&buffer.id())
            .filter(|h| *h == buffer)
            .copied()
            .ok_or_else(|| {
                PipelineError::transfer(format!("buffer {} is not allocated", buffer.id()))
            })?;
        if !handle.tier().is_off_chip() {
            return Err(PipelineError::transfer(format!(
                "buffer {} lives in {}; host transfers need DRAM",
                handle.id(),
                handle.tier()
            )));
        }
        Ok(handle)
    }

    fn resolve_result_buffer(&self, buffer: &BufferHandle) -> Result<BufferHandle> {
        if self.state != RunState::Completed {
            return Err(PipelineError::invalid_state(format!(
                "retrieve needs a completed run, orchestrator is {}",
                self.state
            )));
        }
        self.resolve_host_buffer(buffer)
    }

    fn check_operand(&self, address: u64, what: &str, plan: &ChunkPlan) -> Result<()> {
        let buffer = self
            .buffers
            .values()
            .find(|b| b.tier() == TierKind::Dram && b.address() == address)
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "{what} address {address:#x} is not an allocated DRAM buffer"
                ))
            })?;
        if buffer.size() < plan.total_bytes() as u64 {
            return Err(PipelineError::configuration(format!(
                "{what} buffer {} holds {} bytes, run needs {}",
                buffer.id(),
                buffer.size(),
                plan.total_bytes()
            )));
        }
        Ok(())
    }

    /// Reserve L1 for c0, c1 and c2; all or nothing.
    fn allocate_queue_regions(&mut self, pages: usize, page_bytes: usize) -> Result<Vec<u64>> {
        let size = pages
            .checked_mul(page_bytes)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "{pages} queue pages of {page_bytes} bytes overflow the address space"
                ))
            })?;
        let mut regions = Vec::with_capacity(3);
        for index in [cb::IN0, cb::IN1, cb::OUT0] {
            let id = self.next_buffer_id();
            match self.l1.allocate(id, size) {
                Ok(address) => {
                    debug!("c{index}: {pages} x {page_bytes} bytes at L1 {address:#x}");
                    regions.push(address);
                }
                Err(e) => {
                    for address in regions {
                        self.l1.free(address);
                    }
                    return Err(e);
                }
            }
        }
        Ok(regions)
    }
}

impl<E: Element, O> Drop for Orchestrator<E, O> {
    fn drop(&mut self) {
        if self.state != RunState::Released {
            warn!("Orchestrator dropped without release, releasing");
            self.release();
        }
    }
}

type Outcome = (StageId, std::result::Result<StageReport, StageFault>, Instant);

/// Run every kernel on its own thread and join them all.
fn run_kernels(kernels: Vec<Box<dyn Kernel + '_>>) -> Vec<Outcome> {
    thread::scope(|scope| {
        let handles: Vec<_> = kernels
            .into_iter()
            .map(|kernel| {
                let stage = kernel.stage();
                let handle = thread::Builder::new()
                    .name(format!("wormflow-{stage}"))
                    .spawn_scoped(scope, move || {
                        let result = kernel.execute();
                        (result, Instant::now())
                    });
                (stage, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(stage, handle)| {
                let (result, finished) = match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        (
                            Err(StageFault::Panicked {
                                message: panic_message(payload.as_ref()),
                            }),
                            Instant::now(),
                        )
                    }),
                    Err(e) => (
                        Err(StageFault::Spawn {
                            reason: e.to_string(),
                        }),
                        Instant::now(),
                    ),
                };
                (stage, result, finished)
            })
            .collect()
    })
}

/// The fault to report for a failed run.
///
/// Disconnections are echoes of a failure elsewhere, so the earliest
/// non-cascade fault wins; among cascades only, the earliest.
fn primary_fault(mut faults: Vec<(StageId, StageFault, Instant)>) -> Option<(StageId, StageFault)> {
    faults.sort_by_key(|(_, fault, finished)| (fault.is_cascade(), *finished));
    faults.into_iter().next().map(|(stage, fault, _)| (stage, fault))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_fault_prefers_root_cause() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1);
        let t2 = t0 + Duration::from_millis(2);
        let faults = vec![
            (StageId::Inbound, StageFault::Disconnected { queue: 0 }, t0),
            (StageId::Compute, StageFault::register_bank("boom"), t2),
            (StageId::Outbound, StageFault::Disconnected { queue: 2 }, t1),
        ];
        let (stage, fault) = primary_fault(faults).unwrap();
        assert_eq!(stage, StageId::Compute);
        assert_eq!(fault, StageFault::register_bank("boom"));
    }

    #[test]
    fn earliest_timeout_wins() {
        let t0 = Instant::now();
        let faults = vec![
            (StageId::Outbound, StageFault::timeout("c2 wait"), t0 + Duration::from_millis(3)),
            (StageId::Inbound, StageFault::timeout("c0 reserve"), t0),
        ];
        assert_eq!(primary_fault(faults).unwrap().0, StageId::Inbound);
        assert!(primary_fault(Vec::new()).is_none());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }

    #[test]
    fn allocate_validates_geometry() {
        let mut orch = Orchestrator::<u32, _>::new(DeviceProfile::default(), EltwiseOp::Add);
        assert!(matches!(
            orch.allocate(TierKind::Dram, 0, 4),
            Err(PipelineError::Configuration { .. })
        ));
        assert!(matches!(
            orch.allocate(TierKind::Dram, 1024, 300),
            Err(PipelineError::Configuration { .. })
        ));
        let h = orch.allocate(TierKind::Dram, 1024, 256).unwrap();
        assert_eq!(h.pages(), 4);
        assert_eq!(orch.allocated_bytes(TierKind::Dram), 1024);
    }

    #[test]
    fn configure_rejects_wrong_stage() {
        let mut orch = Orchestrator::<f32, _>::new(DeviceProfile::default(), EltwiseOp::Add);
        let err = orch
            .configure(
                StageId::Inbound,
                crate::program::ComputeArgs { elements: 256, chunk: 64 },
            )
            .unwrap_err();
        assert!(err.to_string().contains("compute arguments bound to the inbound stage"));
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let mut orch = Orchestrator::<i32, _>::new(DeviceProfile::default(), EltwiseOp::Sub);
        orch.allocate(TierKind::Dram, 64, 64).unwrap();
        orch.release();
        orch.release();
        assert_eq!(orch.state(), RunState::Released);
        assert_eq!(orch.allocated_bytes(TierKind::Dram), 0);
        assert!(matches!(orch.run(), Err(PipelineError::InvalidState { .. })));
    }
}
