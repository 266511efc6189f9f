//! Chunk size benchmark: pipeline throughput vs K and queue depth.
//!
//! Streams `N` f32 elements through `C = A + B` for every admissible chunk
//! size K and for queue depths 1, 2 and 4. Small chunks are dominated by the
//! per-chunk handoff cost; large chunks leave less overlap between stages.
//!
//! Usage:
//!   cargo run --release --bin bench_chunk_size
//!   cargo run --release --bin bench_chunk_size -- --elements 65536 --iterations 20

use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use wormflow_chip::format::DataFormat;
use wormflow_driver::{run_elementwise, DeviceProfile, EltwiseOp, RunOptions};

const DEFAULT_ELEMENTS: usize = 16_384;
const DEFAULT_ITERATIONS: usize = 10;
const QUEUE_DEPTHS: [usize; 3] = [1, 2, 4];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let elements = parse_arg(&args, "--elements", DEFAULT_ELEMENTS);
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);

    let profile = DeviceProfile::default();
    // Power-of-two chunk sizes only.
    let chunks: Vec<usize> = profile
        .admissible_chunks(elements, DataFormat::Float32)
        .into_iter()
        .filter(|k| k.is_power_of_two())
        .collect();
    if chunks.is_empty() {
        bail!("no admissible chunk size for N={elements}");
    }

    println!("Chunk size benchmark");
    println!("====================");
    println!("Elements   : {elements} f32");
    println!("Iterations : {iterations}");
    println!();

    #[allow(clippy::cast_precision_loss)]
    let a: Vec<f32> = (0..elements).map(|i| i as f32).collect();
    #[allow(clippy::cast_precision_loss)]
    let b: Vec<f32> = (0..elements).map(|i| (elements - i) as f32).collect();

    print!("{:>6}", "K");
    for depth in QUEUE_DEPTHS {
        print!("  {:>14}", format!("pages={depth}"));
    }
    println!();

    for &k in &chunks {
        print!("{k:>6}");
        for depth in QUEUE_DEPTHS {
            let options = RunOptions::default().with_chunk(k).with_queue_pages(depth);

            // Warmup
            run_elementwise(&profile, options, &a, &b, EltwiseOp::Add)?;

            let t0 = Instant::now();
            for _ in 0..iterations {
                let run = run_elementwise(&profile, options, &a, &b, EltwiseOp::Add)?;
                if !run.verification.passed() {
                    bail!("K={k} pages={depth}: {}", run.verification);
                }
            }
            let mb_s = throughput(t0.elapsed(), iterations * elements * 3 * 4);
            print!("  {:>9.1} MB/s", mb_s);
        }
        println!();
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn throughput(elapsed: Duration, bytes: usize) -> f64 {
    (bytes as f64 / 1_048_576.0) / elapsed.as_secs_f64()
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
