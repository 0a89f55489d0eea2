//! Throughput benchmarks for ml-feed pipelines

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use ml_feed_balance::{EpochOptions, UniformBalancer};
use ml_feed_core::{DataSource, DataType, Error, FieldTemplate, MemorySource, Packer, Result, Value};
use ml_feed_parallel::{BatchPipeline, PipelineConfig};
use ml_feed_transforms::{TransformGraph, ZeroArray};

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Measured iterations
    pub iterations: usize,

    /// Warmup iterations
    pub warmup_iterations: usize,

    /// Batches pulled per iteration
    pub batches_per_iteration: usize,

    /// Samples per batch
    pub batch_size: usize,

    /// Rows in the synthetic dataset
    pub rows: usize,

    /// Shape of the synthetic per-sample array
    pub shape: Vec<usize>,

    /// Simulated per-sample processing cost
    pub delay: Duration,

    /// Worker counts to compare; 0 is the single-threaded pipeline
    pub worker_counts: Vec<usize>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            warmup_iterations: 1,
            batches_per_iteration: 4,
            batch_size: 32,
            rows: 1024,
            shape: vec![64, 64, 3],
            delay: Duration::from_millis(1),
            worker_counts: vec![0, 2, 4],
        }
    }
}

/// Benchmark result
#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    /// Name of the benchmark
    pub name: String,

    /// Total measured time
    pub total_time: Duration,

    /// Average time per iteration
    pub avg_time: Duration,

    /// Fastest iteration
    pub min_time: Duration,

    /// Slowest iteration
    pub max_time: Duration,

    /// Samples per second over the measured iterations
    pub throughput: f64,
}

/// Time `func`, which returns the number of samples it produced
pub fn run_benchmark<F>(name: &str, config: &BenchConfig, mut func: F) -> Result<BenchResult>
where
    F: FnMut() -> Result<usize>,
{
    if config.iterations == 0 {
        return Err(Error::InvalidArgument("at least one iteration is needed".into()));
    }

    for _ in 0..config.warmup_iterations {
        func()?;
    }

    let mut times = Vec::with_capacity(config.iterations);
    let mut samples = 0;
    for _ in 0..config.iterations {
        let start = Instant::now();
        samples += func()?;
        times.push(start.elapsed());
    }

    let total_time: Duration = times.iter().sum();
    let result = BenchResult {
        name: name.to_owned(),
        total_time,
        avg_time: total_time / times.len() as u32,
        min_time: times.iter().min().copied().unwrap_or_default(),
        max_time: times.iter().max().copied().unwrap_or_default(),
        throughput: samples as f64 / total_time.as_secs_f64().max(f64::EPSILON),
    };
    info!("{}: {:.1} samples/s", result.name, result.throughput);
    Ok(result)
}

/// Synthetic dataset with a single integer root field
pub fn synthetic_source(rows: usize) -> Result<Arc<dyn DataSource>> {
    let values = (0..rows).map(|row| Value::Int(row as i64));
    Ok(Arc::new(MemorySource::new().with_field("x", values)?))
}

/// A pipeline over the synthetic dataset whose only node is a slow zero-array producer
pub fn synthetic_pipeline(config: &BenchConfig, workers: usize, shared_memory: bool) -> Result<BatchPipeline> {
    let template = FieldTemplate::new(config.shape.clone(), DataType::Float32);
    let delay = config.delay;
    let factory = move || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        graph.add(
            "zeros",
            ZeroArray::new("z", template.clone()).with_delay(delay).after(["x"]),
        )?;
        graph.with_outputs(["z"])
    };

    let pipeline_config = PipelineConfig::default()
        .with_batch_size(config.batch_size)
        .with_workers(workers)
        .with_shared_memory(shared_memory)
        .with_default_packer(Packer::Array);
    let sampler = Box::new(UniformBalancer::new(config.rows, EpochOptions::default()));
    BatchPipeline::new(pipeline_config, sampler, synthetic_source(config.rows)?, factory)
}

/// Benchmark one pipeline flavour
pub fn bench_pipeline(config: &BenchConfig, workers: usize, shared_memory: bool) -> Result<BenchResult> {
    let mut pipeline = synthetic_pipeline(config, workers, shared_memory)?;
    let name = match (workers, shared_memory) {
        (0, _) => "single thread".to_owned(),
        (n, false) => format!("{n} workers"),
        (n, true) => format!("{n} workers, shared memory"),
    };

    let result = run_benchmark(&name, config, || {
        let mut samples = 0;
        for _ in 0..config.batches_per_iteration {
            samples += pipeline.next_batch()?.len();
        }
        Ok(samples)
    });
    pipeline.close();
    result
}

/// Compare every configured worker count, with and without shared memory
pub fn compare_workers(config: &BenchConfig) -> Result<Vec<BenchResult>> {
    let mut results = Vec::new();
    for &workers in &config.worker_counts {
        results.push(bench_pipeline(config, workers, false)?);
        if workers > 0 {
            results.push(bench_pipeline(config, workers, true)?);
        }
    }
    Ok(results)
}
