//! Batch pipeline: sampler, transform graph(s) and batch assembly

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use static_assertions::assert_impl_all;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use ml_feed_balance::{SamplerConfig, SamplerData};
use ml_feed_core::{
    Batch, DataSource, Error, FieldTemplate, IndexSampler, PackingPlan, Record, Result, SampleIndex,
};
use ml_feed_transforms::TransformGraph;

use crate::config::{LastBatch, PipelineConfig};
use crate::slots::SlotQueue;
use crate::worker::{self, Delivery, Dropped, GraphFactory, ResultSink, Task, WorkerContext};

/// A processed sample and the draw it came from
type Sample = (SampleIndex, Record);

/// Longest single wait on the result queue, so fatal worker errors are noticed
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Statistics from pipeline execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Batches returned
    pub batches: u64,

    /// Real samples returned (filler rows excluded)
    pub samples: u64,

    /// Samples dropped after a per-sample failure
    pub dropped: u64,

    /// Time spent inside `next_batch`
    pub wait_time: Duration,
}

/// Why sample collection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Full,
    End,
    Timeout,
}

/// Everything a collection pass needs from the pipeline owner
struct Feed<'a> {
    sampler: &'a mut dyn IndexSampler,
    source: &'a dyn DataSource,
    roots: &'a [String],
    batch_size: usize,
    stats: &'a mut PipelineStats,
}

impl Feed<'_> {
    /// Failures tolerated before giving up on a batch
    fn failure_budget(&self) -> usize {
        self.sampler.epoch_len().max(1)
    }
}

enum Mode {
    Single(TransformGraph),
    Multi(WorkerPool),
}

/// Produces fixed-size batches from a sampler, a data source and a transform graph.
///
/// With `workers == 0` every sample is processed on the calling thread, in
/// draw order. Otherwise a feeder running inside [`BatchPipeline::next_batch`]
/// keeps a bounded task queue topped up from the sampler, a pool of worker
/// threads (each with its own graph) processes tasks, and results are drained
/// from a bounded result queue or a [`SlotQueue`]. Row order inside a batch is
/// then completion order.
pub struct BatchPipeline {
    id: Uuid,
    config: PipelineConfig,
    sampler: Box<dyn IndexSampler>,
    source: Arc<dyn DataSource>,
    roots: Vec<String>,
    outputs: Vec<String>,
    templates: BTreeMap<String, FieldTemplate>,
    plan: PackingPlan,
    mode: Mode,
    carry: Vec<Sample>,
    batches: usize,
    stats: PipelineStats,
    closed: bool,
}

assert_impl_all!(BatchPipeline: Send);

impl BatchPipeline {
    /// Build a pipeline.
    ///
    /// `factory` builds the transform graph; it is called once here to learn
    /// the root fields, outputs and templates, and once more per worker.
    pub fn new<F>(
        config: PipelineConfig,
        sampler: Box<dyn IndexSampler>,
        source: Arc<dyn DataSource>,
        factory: F,
    ) -> Result<Self>
    where
        F: Fn() -> Result<TransformGraph> + Send + Sync + 'static,
    {
        if config.batch_size == 0 {
            return Err(Error::Construction("batch size must be positive".into()));
        }

        let graph = factory()?;
        let roots = graph.roots().to_vec();
        let provided = source.field_names();
        if let Some(missing) = roots.iter().find(|root| !provided.contains(*root)) {
            return Err(Error::Construction(format!(
                "root field '{missing}' is not provided by the data source"
            )));
        }
        let outputs = graph.declared_outputs();
        let templates = graph.templates();
        let plan = PackingPlan::new(config.packers.clone(), config.default_packer, &outputs)?;

        if config.use_shared_memory && !plan.all_dense(&outputs) {
            return Err(Error::IncompatiblePacking(
                "shared memory needs a dense packer for every output".into(),
            ));
        }

        let id = Uuid::new_v4();
        let mode = if config.workers == 0 {
            if config.use_shared_memory {
                warn!("pipeline {} runs without workers, shared memory is not used", id);
            }
            Mode::Single(graph)
        } else {
            drop(graph);
            Mode::Multi(WorkerPool::start(id, &config, Arc::new(factory), &templates)?)
        };

        info!(
            "pipeline {} created: batch size {}, {} workers, outputs {:?}",
            id, config.batch_size, config.workers, outputs
        );

        let mut pipeline = Self {
            id,
            config,
            sampler,
            source,
            roots,
            outputs,
            templates,
            plan,
            mode,
            carry: Vec::new(),
            batches: 0,
            stats: PipelineStats::default(),
            closed: false,
        };
        pipeline.prime()?;
        Ok(pipeline)
    }

    /// Build the sampler from its configuration, then the pipeline
    pub fn from_sampler_config<F>(
        config: PipelineConfig,
        sampler: &SamplerConfig,
        data: &SamplerData<'_>,
        source: Arc<dyn DataSource>,
        factory: F,
    ) -> Result<Self>
    where
        F: Fn() -> Result<TransformGraph> + Send + Sync + 'static,
    {
        if data.len != source.len() {
            return Err(Error::Construction(format!(
                "sampler covers {} rows, data source has {}",
                data.len,
                source.len()
            )));
        }
        Self::new(config, sampler.build(data)?, source, factory)
    }

    /// Pipeline id, also used in logs and worker thread names
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Output field names, in batch order
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Execution statistics so far
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Per-sample template of every output whose shape is known ahead of time
    pub fn provide_shapes(&self) -> BTreeMap<String, FieldTemplate> {
        self.templates.clone()
    }

    /// Like [`BatchPipeline::provide_shapes`], with the batch dimension prepended
    pub fn provide_batch_shapes(&self) -> BTreeMap<String, FieldTemplate> {
        self.templates
            .iter()
            .map(|(name, template)| (name.clone(), template.batched(self.config.batch_size)))
            .collect()
    }

    /// Produce the next batch.
    ///
    /// Fails with [`Error::StreamExhausted`] once `num_batches` batches were
    /// returned or the sampler ended its epoch with nothing left to return.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if self.closed {
            return Err(Error::PipelineClosed);
        }
        if self.config.num_batches.is_some_and(|limit| self.batches >= limit) {
            return Err(Error::StreamExhausted);
        }

        let started = Instant::now();
        let carry = std::mem::take(&mut self.carry);
        let mut feed = Feed {
            sampler: self.sampler.as_mut(),
            source: self.source.as_ref(),
            roots: &self.roots,
            batch_size: self.config.batch_size,
            stats: &mut self.stats,
        };
        let collected = match &mut self.mode {
            Mode::Single(graph) => collect_single(graph, &mut feed, carry),
            Mode::Multi(pool) => pool.collect(&mut feed, carry, self.config.result_timeout),
        };
        let result = collected.and_then(|(samples, stop)| self.finish(samples, stop));
        self.stats.wait_time += started.elapsed();
        result
    }

    fn finish(&mut self, mut samples: Vec<Sample>, stop: Stop) -> Result<Batch> {
        let batch_size = self.config.batch_size;
        let pad = batch_size - samples.len().min(batch_size);

        if stop != Stop::Full && samples.is_empty() {
            return Err(match stop {
                Stop::Timeout => Error::ResultTimeout(self.config.result_timeout),
                _ => Error::StreamExhausted,
            });
        }

        let real = samples.len();
        match (stop, self.config.last_batch) {
            (Stop::Full, _) | (_, LastBatch::Partial) => {}
            (_, LastBatch::Pad) => {
                let filler: Vec<Sample> = samples.iter().cycle().take(pad).cloned().collect();
                samples.extend(filler);
            }
            (Stop::End, LastBatch::Drop) => {
                debug!("pipeline {} dropping a final batch of {} samples", self.id, real);
                return Err(Error::StreamExhausted);
            }
            (Stop::Timeout, LastBatch::Drop) => {
                debug!("pipeline {} keeping {} samples for the next batch", self.id, real);
                self.carry = samples;
                return Err(Error::ResultTimeout(self.config.result_timeout));
            }
        }

        let batch = Batch::assemble(&self.plan, samples, pad)?;
        self.batches += 1;
        self.stats.batches += 1;
        self.stats.samples += real as u64;
        trace!("pipeline {} batch {} ready ({} rows, pad {})", self.id, self.batches, batch.len(), pad);
        Ok(batch)
    }

    /// Restart the epoch: reset the sampler and drop queued, unstarted tasks.
    ///
    /// Results of tasks already picked up by workers are discarded when they arrive.
    pub fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::PipelineClosed);
        }
        self.sampler.reset();
        self.carry.clear();
        self.batches = 0;
        if let Mode::Multi(pool) = &mut self.mode {
            let cancelled = pool.restart();
            debug!(
                "pipeline {} reset to generation {}, {} queued tasks cancelled",
                self.id, pool.generation, cancelled
            );
        } else {
            debug!("pipeline {} reset", self.id);
        }
        self.prime()
    }

    fn prime(&mut self) -> Result<()> {
        if let Mode::Multi(pool) = &mut self.mode {
            let mut feed = Feed {
                sampler: self.sampler.as_mut(),
                source: self.source.as_ref(),
                roots: &self.roots,
                batch_size: self.config.batch_size,
                stats: &mut self.stats,
            };
            let ceiling = pool.failures + feed.failure_budget();
            pool.feed(&mut feed, ceiling)?;
        }
        Ok(())
    }

    /// Stop the workers and wait for them; later calls fail with [`Error::PipelineClosed`]
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Mode::Multi(pool) = &mut self.mode {
            pool.shutdown();
            pool.join();
        }
        info!("pipeline {} closed after {} batches", self.id, self.stats.batches);
    }
}

impl Drop for BatchPipeline {
    fn drop(&mut self) {
        // signal only: detached workers exit on their own
        if !self.closed {
            if let Mode::Multi(pool) = &mut self.mode {
                pool.shutdown();
            }
        }
    }
}

impl Iterator for BatchPipeline {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Err(Error::StreamExhausted) => None,
            other => Some(other),
        }
    }
}

impl std::fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("id", &self.id)
            .field("outputs", &self.outputs)
            .field("workers", &self.config.workers)
            .field("batches", &self.batches)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn process(graph: &TransformGraph, feed: &Feed<'_>, index: &SampleIndex) -> Result<Record> {
    let record = feed.source.fetch_record(feed.roots, index)?;
    graph.execute(record)
}

fn collect_single(graph: &TransformGraph, feed: &mut Feed<'_>, carry: Vec<Sample>) -> Result<(Vec<Sample>, Stop)> {
    let mut samples = carry;
    let budget = feed.failure_budget();
    let mut failures = 0;

    while samples.len() < feed.batch_size {
        let index = match feed.sampler.next_index() {
            Ok(index) => index,
            Err(err) if err.is_end_of_epoch() => return Ok((samples, Stop::End)),
            Err(err) => return Err(err),
        };
        match process(graph, feed, &index) {
            Ok(record) => samples.push((index, record)),
            Err(err) if err.is_per_sample() => {
                warn!("dropping sample {}: {}", index, err);
                feed.stats.dropped += 1;
                failures += 1;
                if failures > budget {
                    return Err(Error::PerSampleFailure {
                        attempts: failures,
                        last: err.to_string(),
                    });
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok((samples, Stop::Full))
}

enum ResultSource {
    Channel(Receiver<Delivery>),
    Slots(Arc<SlotQueue<(u64, SampleIndex)>>),
}

/// Worker threads plus the owner-side feeder state.
///
/// Every task carries the generation it was drawn in; [`WorkerPool::restart`]
/// bumps the generation so results of an abandoned epoch are discarded on arrival.
struct WorkerPool {
    tasks_tx: Sender<Task>,
    tasks_rx: Receiver<Task>,
    results: ResultSource,
    dropped: Receiver<Dropped>,
    shutdown: Option<Sender<()>>,
    fatal: Receiver<Error>,
    handles: Vec<JoinHandle<()>>,
    generation: u64,
    pending: Option<Task>,
    submitted: usize,
    received: usize,
    worker_dropped: usize,
    failures: usize,
    last_failure: Option<String>,
    exhausted: bool,
}

impl WorkerPool {
    fn start(
        id: Uuid,
        config: &PipelineConfig,
        factory: GraphFactory,
        templates: &BTreeMap<String, FieldTemplate>,
    ) -> Result<Self> {
        let (tasks_tx, tasks_rx) = channel::bounded(config.task_capacity());
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        let (fatal_tx, fatal_rx) = channel::unbounded();
        let (dropped_tx, dropped_rx) = channel::unbounded();

        let (sink, results) = if config.use_shared_memory {
            let slots = Arc::new(SlotQueue::new(templates.clone(), config.result_capacity())?);
            (ResultSink::Slots(Arc::clone(&slots)), ResultSource::Slots(slots))
        } else {
            let (results_tx, results_rx) = channel::bounded(config.result_capacity());
            (ResultSink::Channel(results_tx), ResultSource::Channel(results_rx))
        };

        let context = WorkerContext {
            factory,
            tasks: tasks_rx.clone(),
            results: sink,
            dropped: dropped_tx,
            shutdown: shutdown_rx,
            fatal: fatal_tx,
        };
        let short_id = id.simple().to_string();
        let handles = (0..config.workers)
            .map(|i| worker::spawn(format!("ml-feed-{}-{}", &short_id[..8], i), context.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tasks_tx,
            tasks_rx,
            results,
            dropped: dropped_rx,
            shutdown: Some(shutdown_tx),
            fatal: fatal_rx,
            handles,
            generation: 0,
            pending: None,
            submitted: 0,
            received: 0,
            worker_dropped: 0,
            failures: 0,
            last_failure: None,
            exhausted: false,
        })
    }

    /// Top the task queue up without blocking; a task that does not fit is kept for later.
    ///
    /// Stops drawing once more than `ceiling` failures have been seen.
    fn feed(&mut self, feed: &mut Feed<'_>, ceiling: usize) -> Result<()> {
        loop {
            self.drain_dropped(feed.stats);
            let task = match self.pending.take() {
                Some(task) => task,
                None if self.exhausted || self.failures > ceiling => return Ok(()),
                None => {
                    let index = match feed.sampler.next_index() {
                        Ok(index) => index,
                        Err(err) if err.is_end_of_epoch() => {
                            debug!("feeder reached end of epoch after {} tasks", self.submitted);
                            self.exhausted = true;
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    };
                    match feed.source.fetch_record(feed.roots, &index) {
                        Ok(record) => Task {
                            generation: self.generation,
                            index,
                            record,
                        },
                        Err(err) => {
                            warn!("dropping sample {}: {}", index, err);
                            feed.stats.dropped += 1;
                            self.failures += 1;
                            self.last_failure = Some(format!("sample {index}: {err}"));
                            continue;
                        }
                    }
                }
            };
            match self.tasks_tx.try_send(task) {
                Ok(()) => self.submitted += 1,
                Err(TrySendError::Full(task)) => {
                    self.pending = Some(task);
                    return Ok(());
                }
                Err(TrySendError::Disconnected(_)) => return Err(Error::PipelineClosed),
            }
        }
    }

    /// Fold worker-side drops into the statistics; only the current generation counts as failures
    fn drain_dropped(&mut self, stats: &mut PipelineStats) {
        for dropped in self.dropped.try_iter() {
            stats.dropped += 1;
            if dropped.generation == self.generation {
                self.worker_dropped += 1;
                self.failures += 1;
                self.last_failure = Some(format!("sample {}: {}", dropped.index, dropped.reason));
            }
        }
    }

    /// Every submitted task of this generation delivered or dropped, and nothing left to draw
    fn drained(&self) -> bool {
        self.exhausted && self.pending.is_none() && self.submitted == self.received + self.worker_dropped
    }

    /// Next current-generation sample within `wait`; stale results are discarded
    fn receive(&mut self, wait: Duration) -> Result<Option<Sample>> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let delivery = match &self.results {
                ResultSource::Channel(results) => match results.recv_timeout(remaining) {
                    Ok(delivery) => Some(delivery),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(self
                            .fatal
                            .try_recv()
                            .unwrap_or_else(|_| Error::Worker("all workers exited".into())));
                    }
                },
                ResultSource::Slots(slots) => slots
                    .get_timeout(remaining)?
                    .map(|((generation, index), record)| (generation, index, record)),
            };
            match delivery {
                None => return Ok(None),
                Some((generation, index, _)) if generation != self.generation => {
                    trace!("discarding sample {} from generation {}", index, generation);
                }
                Some((_, index, record)) => {
                    self.received += 1;
                    return Ok(Some((index, record)));
                }
            }
        }
    }

    fn collect(
        &mut self,
        feed: &mut Feed<'_>,
        carry: Vec<Sample>,
        timeout: Duration,
    ) -> Result<(Vec<Sample>, Stop)> {
        let mut samples = carry;
        let failed_at_start = self.failures;
        let ceiling = failed_at_start + feed.failure_budget();
        self.feed(feed, ceiling)?;

        let mut deadline = Instant::now() + timeout;
        while samples.len() < feed.batch_size {
            if let Ok(err) = self.fatal.try_recv() {
                error!("worker failure: {}", err);
                return Err(err);
            }
            self.drain_dropped(feed.stats);
            if self.failures > ceiling {
                return Err(Error::PerSampleFailure {
                    attempts: self.failures - failed_at_start,
                    last: self.last_failure.clone().unwrap_or_default(),
                });
            }

            let wait = deadline.saturating_duration_since(Instant::now()).min(POLL_INTERVAL);
            if let Some(sample) = self.receive(wait)? {
                samples.push(sample);
                deadline = Instant::now() + timeout;
                self.feed(feed, ceiling)?;
                continue;
            }

            self.feed(feed, ceiling)?;
            if self.drained() {
                return Ok((samples, Stop::End));
            }
            if Instant::now() >= deadline {
                warn!("no result within {:?}", timeout);
                return Ok((samples, Stop::Timeout));
            }
        }
        self.drain_dropped(feed.stats);
        Ok((samples, Stop::Full))
    }

    /// Start a new generation: unstarted tasks are dropped and in-flight results will be discarded
    fn restart(&mut self) -> usize {
        let cancelled = usize::from(self.pending.take().is_some()) + self.tasks_rx.try_iter().count();
        self.generation += 1;
        self.submitted = 0;
        self.received = 0;
        self.worker_dropped = 0;
        self.failures = 0;
        self.last_failure = None;
        self.exhausted = false;
        cancelled
    }

    fn shutdown(&mut self) {
        self.shutdown.take();
        if let ResultSource::Slots(slots) = &self.results {
            slots.close();
        }
    }

    fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("a worker thread panicked");
            }
        }
    }
}
