use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ml_feed_balance::{EpochOptions, UniformBalancer};
use ml_feed_core::{
    ArrayData, ArrayValue, Batch, DataSource, DataType, Error, FieldTemplate, MemorySource, Packer, Record,
    Result, SampleError, Value,
};
use ml_feed_parallel::{BatchPipeline, LastBatch, PipelineConfig};
use ml_feed_transforms::{FnNode, TransformGraph, ZeroArray};
use test_case::test_case;

const ROWS: usize = 40;

fn source() -> Arc<dyn DataSource> {
    Arc::new(MemorySource::new().with_field("x", (0..ROWS as i64).map(Value::Int)).unwrap())
}

fn raising() -> Box<UniformBalancer> {
    Box::new(UniformBalancer::new(ROWS, EpochOptions::sequential().with_raise_on_end(true)))
}

/// `y = [x, 2x]` as a templated int64 array; rows divisible by 7 fail
fn doubling_graph() -> Result<TransformGraph> {
    let mut graph = TransformGraph::new(["x"])?;
    let node = FnNode::new(["x"], ["y"], |inputs| {
        let x = match inputs.get("x")? {
            Value::Int(x) if x % 7 != 0 => *x,
            _ => return Err(SampleError::InvalidValue("multiple of seven".into()).into()),
        };
        let y = ArrayValue::new([2], ArrayData::Int64(vec![x, 2 * x]))?;
        Ok(Record::from([("y".to_owned(), y.into())]))
    })
    .with_template("y", FieldTemplate::new([2], DataType::Int64));
    graph.add("double", node)?;
    graph.with_outputs(["y"])
}

fn config(workers: usize) -> PipelineConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    PipelineConfig::default()
        .with_batch_size(4)
        .with_workers(workers)
        .with_queue_capacity(8, 8)
        .with_default_packer(Packer::Array)
}

/// Every `(row, y)` pair the pipeline yields until stream end
fn drain(pipeline: &mut BatchPipeline) -> BTreeSet<(usize, Vec<i64>)> {
    let mut seen = BTreeSet::new();
    for batch in pipeline.by_ref() {
        let batch: Batch = batch.unwrap();
        let y = batch.field("y").unwrap().as_array().unwrap();
        let ArrayData::Int64(values) = y.data() else {
            panic!("unexpected dtype {:?}", y.dtype());
        };
        for (row, index) in batch.indices.iter().enumerate() {
            seen.insert((index.as_one().unwrap(), values[row * 2..row * 2 + 2].to_vec()));
        }
    }
    seen
}

/// Real rows of every batch until stream end, batch by batch
fn drain_rows(pipeline: &mut BatchPipeline) -> Vec<Vec<usize>> {
    pipeline
        .by_ref()
        .map(|batch| batch.unwrap().indices.iter().map(|index| index.as_one().unwrap()).collect())
        .collect()
}

#[test_case(false ; "channel results")]
#[test_case(true ; "shared memory results")]
fn test_workers_match_single_thread(shared_memory: bool) {
    let mut reference = BatchPipeline::new(config(0), raising(), source(), doubling_graph).unwrap();
    let expected = drain(&mut reference);
    assert_eq!(expected.len(), ROWS - 6);

    let mut pipeline = BatchPipeline::new(
        config(3).with_shared_memory(shared_memory),
        raising(),
        source(),
        doubling_graph,
    )
    .unwrap();
    assert_eq!(drain(&mut pipeline), expected);
    assert_eq!(pipeline.stats().dropped, 6);
    assert_eq!(pipeline.stats().samples, (ROWS - 6) as u64);
    pipeline.close();
}

#[test]
fn test_close_rejects_further_calls() {
    let mut pipeline = BatchPipeline::new(config(2), raising(), source(), doubling_graph).unwrap();
    assert_eq!(pipeline.next_batch().unwrap().len(), 4);

    pipeline.close();
    pipeline.close();
    assert!(matches!(pipeline.next_batch(), Err(Error::PipelineClosed)));
    assert!(matches!(pipeline.reset(), Err(Error::PipelineClosed)));
}

#[test_case(1, false ; "one worker")]
#[test_case(3, true ; "three workers shared memory")]
fn test_reset_discards_the_abandoned_epoch(workers: usize, shared_memory: bool) {
    let config = config(workers).with_shared_memory(shared_memory);
    let mut pipeline = BatchPipeline::new(config, raising(), source(), doubling_graph).unwrap();
    pipeline.next_batch().unwrap();
    // let the workers run ahead into the result queue
    thread::sleep(Duration::from_millis(200));
    pipeline.reset().unwrap();

    let batches = drain_rows(&mut pipeline);
    if workers == 1 {
        assert_eq!(batches[0], vec![1, 2, 3, 4]);
    }
    let mut rows: Vec<usize> = batches.into_iter().flatten().collect();
    rows.sort_unstable();
    let expected: Vec<usize> = (0..ROWS).filter(|row| row % 7 != 0).collect();
    assert_eq!(rows, expected);
    pipeline.close();
}

#[test]
fn test_slow_workers_time_out() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        let zeros = ZeroArray::new("z", FieldTemplate::new([3], DataType::Float32))
            .with_delay(Duration::from_millis(500))
            .after(["x"]);
        graph.add("slow", zeros)?;
        graph.with_outputs(["z"])
    };
    let config = config(1).with_result_timeout(Duration::from_millis(50));
    let mut pipeline = BatchPipeline::new(config, raising(), source(), graph).unwrap();

    assert!(matches!(pipeline.next_batch(), Err(Error::ResultTimeout(_))));
    pipeline.close();
}

#[test]
fn test_timeout_keeps_samples_when_dropping_short_batches() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        let zeros = ZeroArray::new("z", FieldTemplate::new([3], DataType::Float32))
            .with_delay(Duration::from_millis(80))
            .after(["x"]);
        graph.add("slow", zeros)?;
        graph.with_outputs(["z"])
    };
    let config = config(1)
        .with_result_timeout(Duration::from_millis(50))
        .with_last_batch(LastBatch::Drop);
    let mut pipeline = BatchPipeline::new(config, raising(), source(), graph).unwrap();

    let mut timeouts = 0;
    let batch = loop {
        match pipeline.next_batch() {
            Ok(batch) => break batch,
            Err(Error::ResultTimeout(_)) => timeouts += 1,
            Err(err) => panic!("unexpected error {err}"),
        }
        assert!(timeouts < 40);
    };
    assert!(timeouts > 0);
    let rows: Vec<usize> = batch.indices.iter().map(|index| index.as_one().unwrap()).collect();
    assert_eq!(rows, vec![0, 1, 2, 3]);
    assert_eq!(batch.pad, 0);
    pipeline.close();
}

#[test]
fn test_worker_graph_failure_is_fatal() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let graph = move || -> Result<TransformGraph> {
        if counter.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::Construction("no graph for workers".into()));
        }
        doubling_graph()
    };
    let mut pipeline = BatchPipeline::new(config(2), raising(), source(), graph).unwrap();

    assert!(matches!(pipeline.next_batch(), Err(Error::Worker(_))));
    pipeline.close();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_all_failing_workers_stop_with_the_last_error() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        let reject = FnNode::new(["x"], ["y"], |inputs| match inputs.get("x")? {
            Value::Int(x) => Err(SampleError::InvalidValue(format!("row {x} rejected")).into()),
            _ => Err(SampleError::InvalidValue("not an int".into()).into()),
        });
        graph.add("reject", reject)?;
        graph.with_outputs(["y"])
    };
    let sampler = Box::new(UniformBalancer::new(ROWS, EpochOptions::sequential()));
    let mut pipeline = BatchPipeline::new(config(2), sampler, source(), graph).unwrap();

    match pipeline.next_batch() {
        Err(Error::PerSampleFailure { attempts, last }) => {
            // over the epoch-length budget, plus at most what was already queued or running
            assert!((ROWS + 1..=ROWS + 16).contains(&attempts), "attempts {attempts}");
            assert!(last.contains("rejected"), "last {last}");
        }
        other => panic!("expected a per-sample failure, got {other:?}"),
    }
    pipeline.close();
}

#[test]
fn test_slot_shape_mismatch_reaches_the_caller() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        let node = FnNode::new(["x"], ["y"], |inputs| {
            let Value::Int(x) = inputs.get("x")? else {
                return Err(SampleError::InvalidValue("not an int".into()).into());
            };
            let y = ArrayValue::new([3], ArrayData::Int64(vec![*x; 3]))?;
            Ok(Record::from([("y".to_owned(), y.into())]))
        })
        .with_template("y", FieldTemplate::new([2], DataType::Int64));
        graph.add("wide", node)?;
        graph.with_outputs(["y"])
    };
    let config = config(2).with_shared_memory(true);
    let mut pipeline = BatchPipeline::new(config, raising(), source(), graph).unwrap();

    match pipeline.next_batch() {
        Err(Error::ShapeMismatch { field, .. }) => assert_eq!(field, "y"),
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
    pipeline.close();
}
