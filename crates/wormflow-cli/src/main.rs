//! `wormflow`: command-line interface for the streaming elementwise pipeline.
//!
//! ```text
//! USAGE:
//!   wormflow run [--config FILE] [--dtype f32] [--elements 256] [--chunk 64]
//!   wormflow sweep [--elements 1024]    Run every admissible chunk size
//!   wormflow info                       Tile resources and core roles
//! ```
//!
//! Inputs are `A[i] = i`, `B[i] = N - i`. Exits non-zero if any element of
//! the device result differs from the host reference.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wormflow_chip::cores::RiscvCore;
use wormflow_driver::{
    run_elementwise, DataFormat, DeviceProfile, Diagnostics, EltwiseOp, Element, ElementwiseRun,
    PipelineConfig, RunOptions, StageId, TierKind,
};

#[derive(Parser)]
#[command(
    name = "wormflow",
    about = "Streaming elementwise pipeline on a simulated Tensix tile",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one elementwise pipeline and verify it against the host.
    Run {
        #[command(flatten)]
        workload: Workload,
        /// Elements per chunk (K).
        #[arg(long)]
        chunk: Option<usize>,
        /// Trace per-chunk events for a stage (inbound, compute, outbound).
        #[arg(long = "trace", value_name = "STAGE")]
        trace: Vec<String>,
        /// Print the per-stage and per-queue report.
        #[arg(long)]
        report: bool,
    },
    /// Run every admissible chunk size for N and tabulate throughput.
    Sweep {
        #[command(flatten)]
        workload: Workload,
    },
    /// Print tile resources, core roles and admissible chunk sizes.
    Info {
        /// Elements to list admissible chunk sizes for.
        #[arg(long, default_value_t = 256)]
        elements: usize,
    },
}

#[derive(Args)]
struct Workload {
    /// TOML pipeline configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Element format (f32, u32, i32).
    #[arg(long)]
    dtype: Option<DataFormat>,
    /// Elementwise operator (add, sub, mul).
    #[arg(long)]
    op: Option<EltwiseOp>,
    /// Elements per array (N).
    #[arg(long)]
    elements: Option<usize>,
    /// Pages per handoff queue.
    #[arg(long)]
    queue_pages: Option<usize>,
    /// Run deadline in milliseconds (0 disables).
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl Workload {
    /// Config file (or defaults) with command-line overrides applied.
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(dtype) = self.dtype {
            config.run.dtype = dtype;
        }
        if let Some(op) = self.op {
            config.run.op = op;
        }
        if let Some(elements) = self.elements {
            config.run.elements = elements;
        }
        if let Some(pages) = self.queue_pages {
            config.run.queue_pages = pages;
        }
        if let Some(ms) = self.timeout_ms {
            config.run.timeout_ms = ms;
        }
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let passed = match cli.command {
        Cmd::Run {
            workload,
            chunk,
            trace,
            report,
        } => cmd_run(&workload, chunk, &trace, report)?,
        Cmd::Sweep { workload } => cmd_sweep(&workload)?,
        Cmd::Info { elements } => {
            cmd_info(elements);
            true
        }
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Result of one run with the element type erased.
struct Outcome {
    line: String,
    passed: bool,
    report: wormflow_driver::RunReport,
}

fn run_typed<E: Element>(
    profile: &DeviceProfile,
    options: RunOptions,
    n: usize,
    op: EltwiseOp,
) -> Result<Outcome> {
    let a: Vec<E> = (0..n).map(E::from_usize).collect();
    let b: Vec<E> = (0..n).map(|i| E::from_usize(n - i)).collect();
    let ElementwiseRun {
        report,
        verification,
        ..
    } = run_elementwise(profile, options, &a, &b, op)?;
    Ok(Outcome {
        line: verification.to_string(),
        passed: verification.passed(),
        report,
    })
}

fn run_once(config: &PipelineConfig, options: RunOptions) -> Result<Outcome> {
    let (profile, n, op) = (&config.device, config.run.elements, config.run.op);
    match config.run.dtype {
        DataFormat::Float32 => run_typed::<f32>(profile, options, n, op),
        DataFormat::UInt32 => run_typed::<u32>(profile, options, n, op),
        DataFormat::Int32 => run_typed::<i32>(profile, options, n, op),
    }
}

fn cmd_run(
    workload: &Workload,
    chunk: Option<usize>,
    trace: &[String],
    show_report: bool,
) -> Result<bool> {
    let mut config = workload.resolve()?;
    if let Some(chunk) = chunk {
        config.run.chunk = chunk;
    }
    for stage in trace {
        match stage.to_lowercase().as_str() {
            "inbound" => config.diagnostics.inbound = true,
            "compute" => config.diagnostics.compute = true,
            "outbound" => config.diagnostics.outbound = true,
            "all" => config.diagnostics = Diagnostics::ALL,
            other => bail!("unknown stage '{other}' (expected inbound, compute, outbound or all)"),
        }
    }

    let outcome = run_once(&config, config.run_options())?;
    println!("{}", outcome.line);

    if show_report {
        let r = &outcome.report;
        println!();
        println!(
            "{} {}  N={}  K={}  chunks={}  pages/queue={}  {:?}  ({:.1} MB/s)",
            r.op,
            r.format,
            r.elements,
            r.chunk,
            r.chunks,
            r.queue_pages,
            r.elapsed,
            r.throughput_mb_s()
        );
        for stage in StageId::ALL {
            if let Some(s) = r.stage(stage) {
                println!(
                    "  {:<8} {:<6} chunks={:<5} bytes={:<8} {:?}",
                    stage.name(),
                    stage.core().name(),
                    s.chunks,
                    s.bytes,
                    s.elapsed
                );
            }
        }
        for q in &r.queues {
            println!(
                "  c{}  committed={} released={} high-water={}/{}",
                q.index, q.committed, q.released, q.high_water, q.capacity
            );
        }
    }

    Ok(outcome.passed)
}

fn cmd_sweep(workload: &Workload) -> Result<bool> {
    let config = workload.resolve()?;
    let chunks = config
        .device
        .admissible_chunks(config.run.elements, config.run.dtype);
    if chunks.is_empty() {
        bail!(
            "no admissible chunk size for N={} {}",
            config.run.elements,
            config.run.dtype
        );
    }

    println!(
        "{} {}  N={}  pages/queue={}",
        config.run.op, config.run.dtype, config.run.elements, config.run.queue_pages
    );
    println!(
        "{:>6} {:>7} {:>12} {:>10}  result",
        "K", "chunks", "elapsed", "MB/s"
    );

    let mut all_passed = true;
    for k in chunks {
        let options = config.run_options().with_chunk(k);
        let outcome = run_once(&config, options)?;
        let r = &outcome.report;
        println!(
            "{:>6} {:>7} {:>12} {:>10.1}  {}",
            k,
            r.chunks,
            format!("{:?}", r.elapsed),
            r.throughput_mb_s(),
            if outcome.passed { "ok" } else { "FAIL" }
        );
        if !outcome.passed {
            println!("       {}", outcome.line);
        }
        all_passed &= outcome.passed;
    }
    Ok(all_passed)
}

fn cmd_info(elements: usize) {
    let p = DeviceProfile::default();
    println!(
        "DRAM bank    : {} bytes (reserved {:#x}, align {})",
        p.dram_bytes,
        TierKind::Dram.reserved(),
        TierKind::Dram.alignment()
    );
    println!(
        "L1           : {} bytes (reserved {:#x}, align {})",
        p.l1_bytes,
        TierKind::L1.reserved(),
        TierKind::L1.alignment()
    );
    println!("Page         : {} bytes", p.page_capacity_bytes);
    println!("Dst segments : {}", p.register_segments);
    println!("Run timeout  : {:?}", RunOptions::default().timeout.unwrap_or(Duration::ZERO));
    println!();

    println!("Cores:");
    for core in RiscvCore::ALL {
        let role = StageId::ALL
            .iter()
            .find(|s| s.core() == core)
            .map_or("-", |s| s.name());
        println!(
            "  {:<7} reset bit {:>2}  stage {}",
            core.name(),
            core.soft_reset_bit(),
            role
        );
    }
    println!();

    println!("Admissible chunk sizes for N={elements}:");
    for format in DataFormat::ALL {
        let ks = p.admissible_chunks(elements, format);
        println!("  {format}: {ks:?}");
    }
}
