//! Stage identities, runtime arguments and chunk planning.

use serde::{Deserialize, Serialize};
use wormflow_chip::cores::RiscvCore;
use wormflow_chip::format::DataFormat;

use crate::error::{PipelineError, Result};

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    /// Off-chip → c0/c1 data mover
    Inbound,
    /// c0/c1 → c2 math
    Compute,
    /// c2 → off-chip data mover
    Outbound,
}

impl StageId {
    /// All stages in pipeline order.
    pub const ALL: [Self; 3] = [Self::Inbound, Self::Compute, Self::Outbound];

    /// Core the stage runs on.
    ///
    /// Compute spans the three TRISCs on silicon; it is reported against the
    /// math core.
    pub const fn core(self) -> RiscvCore {
        match self {
            Self::Inbound => RiscvCore::Brisc,
            Self::Compute => RiscvCore::Trisc1,
            Self::Outbound => RiscvCore::Ncrisc,
        }
    }

    /// Lowercase stage name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Compute => "compute",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inbound stage arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundArgs {
    /// DRAM address of operand A
    pub src_a_addr: u64,
    /// DRAM address of operand B
    pub src_b_addr: u64,
    /// Total elements N
    pub elements: usize,
    /// Chunk elements K
    pub chunk: usize,
}

/// Compute stage arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeArgs {
    /// Total elements N
    pub elements: usize,
    /// Chunk elements K
    pub chunk: usize,
}

/// Outbound stage arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundArgs {
    /// DRAM address of the result
    pub dst_addr: u64,
    /// Total elements N
    pub elements: usize,
    /// Chunk elements K
    pub chunk: usize,
}

/// Runtime arguments bound to one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageArgs {
    /// For [`StageId::Inbound`]
    Inbound(InboundArgs),
    /// For [`StageId::Compute`]
    Compute(ComputeArgs),
    /// For [`StageId::Outbound`]
    Outbound(OutboundArgs),
}

impl StageArgs {
    /// Stage these arguments belong to
    pub const fn stage(&self) -> StageId {
        match self {
            Self::Inbound(_) => StageId::Inbound,
            Self::Compute(_) => StageId::Compute,
            Self::Outbound(_) => StageId::Outbound,
        }
    }

    /// Total elements N
    pub const fn elements(&self) -> usize {
        match self {
            Self::Inbound(a) => a.elements,
            Self::Compute(a) => a.elements,
            Self::Outbound(a) => a.elements,
        }
    }

    /// Chunk elements K
    pub const fn chunk(&self) -> usize {
        match self {
            Self::Inbound(a) => a.chunk,
            Self::Compute(a) => a.chunk,
            Self::Outbound(a) => a.chunk,
        }
    }

    /// Ordered scalar form, as written to the core's runtime-argument slots.
    ///
    /// ```
    /// use wormflow_driver::{InboundArgs, StageArgs};
    ///
    /// let args = StageArgs::Inbound(InboundArgs {
    ///     src_a_addr: 0x20,
    ///     src_b_addr: 0x420,
    ///     elements: 256,
    ///     chunk: 64,
    /// });
    /// assert_eq!(args.to_words(), vec![0x20, 0x420, 256, 64]);
    /// ```
    pub fn to_words(&self) -> Vec<u64> {
        match *self {
            Self::Inbound(a) => vec![a.src_a_addr, a.src_b_addr, a.elements as u64, a.chunk as u64],
            Self::Compute(a) => vec![a.elements as u64, a.chunk as u64],
            Self::Outbound(a) => vec![a.dst_addr, a.elements as u64, a.chunk as u64],
        }
    }
}

impl From<InboundArgs> for StageArgs {
    fn from(a: InboundArgs) -> Self {
        Self::Inbound(a)
    }
}

impl From<ComputeArgs> for StageArgs {
    fn from(a: ComputeArgs) -> Self {
        Self::Compute(a)
    }
}

impl From<OutboundArgs> for StageArgs {
    fn from(a: OutboundArgs) -> Self {
        Self::Outbound(a)
    }
}

/// A validated split of N elements into chunks of K.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    elements: usize,
    chunk: usize,
    element_size: usize,
}

impl ChunkPlan {
    /// Validate `elements`/`chunk` for a format and page size.
    ///
    /// # Errors
    ///
    /// `PipelineError::Configuration` if N or K is zero, K does not divide N,
    /// or one chunk does not fit a page.
    pub fn new(
        elements: usize,
        chunk: usize,
        format: DataFormat,
        page_capacity_bytes: usize,
    ) -> Result<Self> {
        if elements == 0 {
            return Err(PipelineError::configuration("element count must be positive"));
        }
        if chunk == 0 {
            return Err(PipelineError::configuration("chunk size must be positive"));
        }
        if elements % chunk != 0 {
            return Err(PipelineError::configuration(format!(
                "chunk size {chunk} does not divide element count {elements}"
            )));
        }
        let element_size = format.size_bytes();
        let chunk_bytes = chunk * element_size;
        if chunk_bytes > page_capacity_bytes {
            return Err(PipelineError::configuration(format!(
                "chunk of {chunk} {format} elements ({chunk_bytes} bytes) exceeds page capacity of {page_capacity_bytes} bytes"
            )));
        }
        Ok(Self {
            elements,
            chunk,
            element_size,
        })
    }

    /// Total elements N
    pub const fn elements(&self) -> usize {
        self.elements
    }

    /// Chunk elements K
    pub const fn chunk(&self) -> usize {
        self.chunk
    }

    /// Number of chunks N/K
    pub const fn chunks(&self) -> usize {
        self.elements / self.chunk
    }

    /// Bytes per chunk
    pub const fn chunk_bytes(&self) -> usize {
        self.chunk * self.element_size
    }

    /// Bytes per array
    pub const fn total_bytes(&self) -> usize {
        self.elements * self.element_size
    }

    /// Byte offset of chunk `i` within an array
    pub const fn offset(&self, i: usize) -> u64 {
        (i * self.chunk_bytes()) as u64
    }
}

/// Arguments for all three stages, validated as a set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Program {
    pub inbound: InboundArgs,
    pub compute: ComputeArgs,
    pub outbound: OutboundArgs,
    pub plan: ChunkPlan,
}

/// Per-stage argument slots filled by `configure`.
#[derive(Debug, Default, Clone)]
pub(crate) struct Bindings {
    inbound: Option<InboundArgs>,
    compute: Option<ComputeArgs>,
    outbound: Option<OutboundArgs>,
}

impl Bindings {
    pub fn bind(&mut self, args: StageArgs) {
        match args {
            StageArgs::Inbound(a) => self.inbound = Some(a),
            StageArgs::Compute(a) => self.compute = Some(a),
            StageArgs::Outbound(a) => self.outbound = Some(a),
        }
    }

    pub fn is_bound(&self, stage: StageId) -> bool {
        match stage {
            StageId::Inbound => self.inbound.is_some(),
            StageId::Compute => self.compute.is_some(),
            StageId::Outbound => self.outbound.is_some(),
        }
    }

    /// Check every stage is bound with the same N and K.
    pub fn complete(&self, format: DataFormat, page_capacity_bytes: usize) -> Result<Program> {
        let missing: Vec<&str> = StageId::ALL
            .iter()
            .filter(|s| !self.is_bound(**s))
            .map(|s| s.name())
            .collect();
        let (Some(inbound), Some(compute), Some(outbound)) =
            (self.inbound, self.compute, self.outbound)
        else {
            return Err(PipelineError::configuration(format!(
                "stages not configured: {}",
                missing.join(", ")
            )));
        };

        let shapes = [
            (StageId::Inbound, inbound.elements, inbound.chunk),
            (StageId::Compute, compute.elements, compute.chunk),
            (StageId::Outbound, outbound.elements, outbound.chunk),
        ];
        for (stage, elements, chunk) in &shapes[1..] {
            if (*elements, *chunk) != (inbound.elements, inbound.chunk) {
                return Err(PipelineError::configuration(format!(
                    "{stage} stage has N={elements} K={chunk}, inbound has N={} K={}",
                    inbound.elements, inbound.chunk
                )));
            }
        }

        let plan = ChunkPlan::new(inbound.elements, inbound.chunk, format, page_capacity_bytes)?;
        Ok(Program {
            inbound,
            compute,
            outbound,
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(elements: usize, chunk: usize) -> StageArgs {
        InboundArgs {
            src_a_addr: 0x20,
            src_b_addr: 0x440,
            elements,
            chunk,
        }
        .into()
    }

    #[test]
    fn plan_rejects_bad_shapes() {
        let f = DataFormat::Float32;
        assert!(ChunkPlan::new(0, 1, f, 4096).is_err());
        assert!(ChunkPlan::new(256, 0, f, 4096).is_err());
        assert!(ChunkPlan::new(256, 48, f, 4096).is_err());
        assert!(ChunkPlan::new(2048, 2048, f, 4096).is_err());

        let plan = ChunkPlan::new(256, 64, f, 4096).unwrap();
        assert_eq!(plan.chunks(), 4);
        assert_eq!(plan.chunk_bytes(), 256);
        assert_eq!(plan.offset(3), 768);
        assert_eq!(plan.total_bytes(), 1024);
    }

    #[test]
    fn single_chunk_plan() {
        let plan = ChunkPlan::new(64, 64, DataFormat::UInt32, 4096).unwrap();
        assert_eq!(plan.chunks(), 1);
        assert_eq!(plan.offset(0), 0);
    }

    #[test]
    fn words_follow_argument_order() {
        let c = StageArgs::Compute(ComputeArgs { elements: 256, chunk: 64 });
        assert_eq!(c.to_words(), vec![256, 64]);
        let o = StageArgs::Outbound(OutboundArgs {
            dst_addr: 0x860,
            elements: 256,
            chunk: 64,
        });
        assert_eq!(o.to_words(), vec![0x860, 256, 64]);
        assert_eq!(o.stage(), StageId::Outbound);
    }

    #[test]
    fn stages_map_to_cores() {
        assert_eq!(StageId::Inbound.core(), RiscvCore::Brisc);
        assert_eq!(StageId::Outbound.core(), RiscvCore::Ncrisc);
        assert!(StageId::Compute.core().is_compute());
        assert_eq!(StageId::Compute.to_string(), "compute");
    }

    #[test]
    fn incomplete_bindings_name_missing_stages() {
        let mut b = Bindings::default();
        b.bind(inbound(256, 64));
        let err = b.complete(DataFormat::Float32, 4096).unwrap_err();
        assert!(err.to_string().contains("compute, outbound"));
    }

    #[test]
    fn bindings_require_matching_shapes() {
        let mut b = Bindings::default();
        b.bind(inbound(256, 64));
        b.bind(ComputeArgs { elements: 256, chunk: 32 }.into());
        b.bind(
            OutboundArgs {
                dst_addr: 0x860,
                elements: 256,
                chunk: 64,
            }
            .into(),
        );
        assert!(matches!(
            b.complete(DataFormat::Float32, 4096),
            Err(PipelineError::Configuration { .. })
        ));

        b.bind(ComputeArgs { elements: 256, chunk: 64 }.into());
        let program = b.complete(DataFormat::Float32, 4096).unwrap();
        assert_eq!(program.plan.chunks(), 4);
        assert_eq!(program.outbound.dst_addr, 0x860);
    }
}
