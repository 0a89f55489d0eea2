use std::sync::Arc;

use ml_feed_balance::{ClassBalancer, EpochOptions, SamplerConfig, SamplerData, SequenceBalancer, UniformBalancer};
use ml_feed_core::{
    ArrayData, Batch, DataSource, DataType, Error, FieldTemplate, MemorySource, PackedField, Packer, Record,
    Result, SampleError, SampleIndex, Value,
};
use ml_feed_parallel::{BatchPipeline, LastBatch, PipelineConfig};
use ml_feed_transforms::{FnNode, Identity, TransformGraph, ZeroArray};
use proptest::prelude::*;
use test_case::test_case;

fn source(rows: i64) -> Arc<dyn DataSource> {
    Arc::new(MemorySource::new().with_field("x", (0..rows).map(Value::Int)).unwrap())
}

fn identity_graph() -> Result<TransformGraph> {
    let mut graph = TransformGraph::new(["x"])?;
    graph.add("copy", Identity::new(["x"], ["y"])?)?;
    graph.with_outputs(["y"])
}

/// Only even `x` survive
fn evens_graph() -> Result<TransformGraph> {
    let mut graph = TransformGraph::new(["x"])?;
    graph.add(
        "evens",
        FnNode::new(["x"], ["y"], |inputs| match inputs.get("x")? {
            Value::Int(v) if v % 2 == 0 => Ok(Record::from([("y".to_owned(), Value::Int(*v))])),
            _ => Err(SampleError::InvalidValue("odd".into()).into()),
        }),
    )?;
    graph.with_outputs(["y"])
}

fn single(batch_size: usize) -> PipelineConfig {
    PipelineConfig::default()
        .with_batch_size(batch_size)
        .with_workers(0)
        .with_default_packer(Packer::Array)
}

fn raising(rows: usize) -> Box<UniformBalancer> {
    Box::new(UniformBalancer::new(rows, EpochOptions::sequential().with_raise_on_end(true)))
}

fn rows(batch: &Batch) -> Vec<usize> {
    batch.indices.iter().map(|index| index.as_one().unwrap()).collect()
}

fn column(batch: &Batch, name: &str) -> Vec<i64> {
    match batch.field(name).unwrap().as_array().unwrap().data() {
        ArrayData::Int64(values) => values.clone(),
        other => panic!("unexpected column {other:?}"),
    }
}

#[test]
fn test_class_balanced_batches() {
    let classes = vec![0, 1, 0, 1, 0, 1];
    let sampler = ClassBalancer::from_classes(classes.clone(), 2, EpochOptions::sequential()).unwrap();
    let mut pipeline = BatchPipeline::new(single(4), Box::new(sampler), source(6), identity_graph).unwrap();

    let batch = pipeline.next_batch().unwrap();
    assert_eq!(rows(&batch), vec![0, 1, 2, 3]);
    let drawn: Vec<usize> = rows(&batch).iter().map(|&row| classes[row]).collect();
    assert_eq!(drawn, vec![0, 1, 0, 1]);
    assert_eq!(column(&batch, "y"), vec![0, 1, 2, 3]);
    assert_eq!(batch.pad, 0);

    for _ in 0..5 {
        let batch = pipeline.next_batch().unwrap();
        assert_eq!(batch.len(), 4);
    }
    assert_eq!(pipeline.stats().batches, 6);
    assert_eq!(pipeline.stats().samples, 24);
}

#[test]
fn test_num_batches_then_reset() {
    let sampler = Box::new(UniformBalancer::new(10, EpochOptions::sequential()));
    let config = single(3).with_num_batches(2);
    let mut pipeline = BatchPipeline::new(config, sampler, source(10), identity_graph).unwrap();

    assert_eq!(rows(&pipeline.next_batch().unwrap()), vec![0, 1, 2]);
    assert_eq!(rows(&pipeline.next_batch().unwrap()), vec![3, 4, 5]);
    assert!(matches!(pipeline.next_batch(), Err(Error::StreamExhausted)));

    pipeline.reset().unwrap();
    assert_eq!(rows(&pipeline.next_batch().unwrap()), vec![0, 1, 2]);
}

#[test_case(LastBatch::Partial, Some((vec![4, 5], 2)) ; "partial")]
#[test_case(LastBatch::Pad, Some((vec![4, 5, 4, 5], 2)) ; "pad")]
#[test_case(LastBatch::Drop, None ; "drop")]
fn test_last_batch_policy(policy: LastBatch, expected: Option<(Vec<usize>, usize)>) {
    let config = single(4).with_last_batch(policy);
    let mut pipeline = BatchPipeline::new(config, raising(6), source(6), identity_graph).unwrap();

    assert_eq!(rows(&pipeline.next_batch().unwrap()), vec![0, 1, 2, 3]);
    if let Some((indices, pad)) = expected {
        let batch = pipeline.next_batch().unwrap();
        assert_eq!(rows(&batch), indices);
        assert_eq!(batch.pad, pad);
    }
    assert!(matches!(pipeline.next_batch(), Err(Error::StreamExhausted)));
    assert!(matches!(pipeline.next_batch(), Err(Error::StreamExhausted)));
}

#[test]
fn test_iterator_stops_at_stream_end() {
    let mut pipeline = BatchPipeline::new(single(4), raising(10), source(10), identity_graph).unwrap();
    let batches: Vec<Batch> = pipeline.by_ref().collect::<Result<_>>().unwrap();
    assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
}

#[test]
fn test_failing_samples_are_dropped() {
    let mut pipeline = BatchPipeline::new(single(4), raising(6), source(6), evens_graph).unwrap();

    let batch = pipeline.next_batch().unwrap();
    assert_eq!(rows(&batch), vec![0, 2, 4]);
    assert_eq!(batch.pad, 1);
    assert_eq!(pipeline.stats().dropped, 3);
    assert!(matches!(pipeline.next_batch(), Err(Error::StreamExhausted)));
}

#[test]
fn test_all_failing_samples_stop_the_pipeline() {
    let sampler = Box::new(UniformBalancer::new(6, EpochOptions::sequential()));
    let odd = Arc::new(MemorySource::new().with_field("x", [1_i64, 3, 5, 7, 9, 11].map(Value::Int)).unwrap());
    let mut pipeline = BatchPipeline::new(single(4), sampler, odd, evens_graph).unwrap();

    match pipeline.next_batch() {
        Err(Error::PerSampleFailure { attempts, .. }) => assert_eq!(attempts, 7),
        other => panic!("expected a per-sample failure, got {other:?}"),
    }
}

#[test]
fn test_tensor_cannot_mix_with_lists() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        graph.add("a", Identity::new(["x"], ["y"])?)?;
        graph.add("b", Identity::new(["x"], ["z"])?)?;
        Ok(graph)
    };
    let config = single(2).with_default_packer(Packer::List).with_packer("y", Packer::Tensor);
    let result = BatchPipeline::new(config, raising(4), source(4), graph);
    assert!(matches!(result, Err(Error::IncompatiblePacking(_))));
}

#[test]
fn test_shared_memory_needs_dense_packers() {
    let config = single(2).with_default_packer(Packer::List).with_shared_memory(true);
    let result = BatchPipeline::new(config, raising(4), source(4), identity_graph);
    assert!(matches!(result, Err(Error::IncompatiblePacking(_))));
}

#[test]
fn test_missing_root_field() {
    let graph = || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["path"])?;
        graph.add("copy", Identity::new(["path"], ["y"])?)?;
        Ok(graph)
    };
    let result = BatchPipeline::new(single(2), raising(4), source(4), graph);
    assert!(matches!(result, Err(Error::Construction(_))));
}

#[test]
fn test_batch_shapes() {
    let template = FieldTemplate::new([2, 3], DataType::Float32);
    let graph = move || -> Result<TransformGraph> {
        let mut graph = TransformGraph::new(["x"])?;
        graph.add("zeros", ZeroArray::new("z", template.clone()).after(["x"]))?;
        graph.with_outputs(["z"])
    };
    let mut pipeline = BatchPipeline::new(single(4), raising(8), source(8), graph).unwrap();

    let shapes = pipeline.provide_shapes();
    assert_eq!(shapes["z"].shape, vec![2, 3]);
    let batched = pipeline.provide_batch_shapes();
    assert_eq!(batched["z"].shape, vec![4, 2, 3]);
    assert_eq!(batched["z"].dtype, DataType::Float32);

    let batch = pipeline.next_batch().unwrap();
    assert_eq!(batch.field("z").unwrap().as_array().unwrap().shape(), &[4, 2, 3]);
}

#[test]
fn test_from_sampler_config() {
    let labels: Vec<Vec<f32>> = (0..6).map(|i| if i < 2 { vec![1.0, 0.0] } else { vec![0.0, 1.0] }).collect();
    let sampler = SamplerConfig::from_json(r#"{"kind": "class", "shuffle": false}"#).unwrap();
    let data = SamplerData::new(6).with_labels(&labels);
    let mut pipeline =
        BatchPipeline::from_sampler_config(single(4), &sampler, &data, source(6), identity_graph).unwrap();

    assert_eq!(rows(&pipeline.next_batch().unwrap()), vec![0, 2, 1, 3]);

    let short = SamplerData::new(5);
    let uniform = SamplerConfig::default();
    let result = BatchPipeline::from_sampler_config(single(4), &uniform, &short, source(6), identity_graph);
    assert!(matches!(result, Err(Error::Construction(_))));
}

#[test]
fn test_sequence_draws_become_lists() {
    let sampler = SequenceBalancer::new(raising(6), 2).unwrap();
    let config = single(2).with_default_packer(Packer::List);
    let mut pipeline = BatchPipeline::new(config, Box::new(sampler), source(6), identity_graph).unwrap();

    let batch = pipeline.next_batch().unwrap();
    assert_eq!(
        batch.indices[1],
        SampleIndex::Many(vec![SampleIndex::One(2), SampleIndex::One(3)])
    );
    let Some(PackedField::List(values)) = batch.field("y") else {
        panic!("expected a list field");
    };
    assert_eq!(values[0], Value::List(vec![Value::Int(0), Value::Int(1)]));

    assert_eq!(pipeline.next_batch().unwrap().len(), 1);
    assert!(matches!(pipeline.next_batch(), Err(Error::StreamExhausted)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_partial_batches_cover_the_epoch(len in 1_usize..40, batch_size in 1_usize..9) {
        let mut pipeline =
            BatchPipeline::new(single(batch_size), raising(len), source(len as i64), identity_graph).unwrap();

        let mut seen = Vec::new();
        for batch in pipeline.by_ref() {
            let batch = batch.unwrap();
            prop_assert!(batch.len() <= batch_size);
            prop_assert_eq!(batch.len() + batch.pad, batch_size);
            seen.extend(rows(&batch));
        }
        prop_assert_eq!(seen, (0..len).collect::<Vec<_>>());
    }
}
