//! Benchmark runner comparing single-threaded and worker-pool pipelines

use std::fs;

use anyhow::{Context, Result};
use ml_feed_bench::{compare_workers, BenchConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&json).with_context(|| format!("parsing {path}"))?
        }
        None => BenchConfig::default(),
    };

    println!("=== ml-feed pipeline throughput ===");
    println!(
        "batch size {}, sample shape {:?}, {:?} per sample",
        config.batch_size, config.shape, config.delay
    );

    for result in compare_workers(&config).context("benchmark failed")? {
        println!("\nBenchmark: {}", result.name);
        println!("  Total time:   {:?}", result.total_time);
        println!("  Average time: {:?}", result.avg_time);
        println!("  Min time:     {:?}", result.min_time);
        println!("  Max time:     {:?}", result.max_time);
        println!("  Throughput:   {:.2} samples/sec", result.throughput);
    }
    Ok(())
}
