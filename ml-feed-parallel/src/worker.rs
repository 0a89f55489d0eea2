//! Worker threads executing transform graphs over queued tasks

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{select, Receiver, Sender, TryRecvError};
use tracing::{debug, error, warn};

use ml_feed_core::{Error, Record, Result, SampleIndex};
use ml_feed_transforms::TransformGraph;

use crate::slots::SlotQueue;

/// Builds a worker's private transform graph
pub type GraphFactory = Arc<dyn Fn() -> Result<TransformGraph> + Send + Sync>;

/// One sample for a worker: the draw and its raw root values
#[derive(Debug, Clone)]
pub struct Task {
    /// Epoch generation the task was drawn in
    pub generation: u64,
    /// Originating draw
    pub index: SampleIndex,
    /// Raw root field values
    pub record: Record,
}

/// A processed sample tagged with its generation
pub type Delivery = (u64, SampleIndex, Record);

/// A sample a worker gave up on
#[derive(Debug, Clone)]
pub struct Dropped {
    /// Epoch generation of the task
    pub generation: u64,
    /// Originating draw
    pub index: SampleIndex,
    /// Failure message
    pub reason: String,
}

/// Where workers deliver processed samples
#[derive(Debug, Clone)]
pub enum ResultSink {
    /// Plain bounded channel
    Channel(Sender<Delivery>),
    /// Shared slot queue, keyed by generation and draw
    Slots(Arc<SlotQueue<(u64, SampleIndex)>>),
}

/// Channels a worker runs against
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) factory: GraphFactory,
    pub(crate) tasks: Receiver<Task>,
    pub(crate) results: ResultSink,
    pub(crate) dropped: Sender<Dropped>,
    pub(crate) shutdown: Receiver<()>,
    pub(crate) fatal: Sender<Error>,
}

/// Spawn one named worker thread
pub(crate) fn spawn(name: String, context: WorkerContext) -> Result<JoinHandle<()>> {
    let thread_name = name.clone();
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            if let Err(err) = run(&name, &context) {
                error!("worker {} stopped: {}", name, err);
                // the owner may already be gone
                let _ = context.fatal.send(err);
            }
        })
        .map_err(Error::Io)
}

fn run(name: &str, context: &WorkerContext) -> Result<()> {
    let graph = (context.factory)().map_err(|e| Error::Worker(format!("{name}: graph construction failed: {e}")))?;
    debug!("worker {} ready", name);

    loop {
        if let Err(TryRecvError::Disconnected) = context.shutdown.try_recv() {
            break;
        }
        let task = select! {
            recv(context.tasks) -> task => match task {
                Ok(task) => task,
                Err(_) => break,
            },
            recv(context.shutdown) -> _ => break,
        };

        match graph.execute(task.record) {
            Ok(record) => {
                if !deliver(context, (task.generation, task.index, record))? {
                    break;
                }
            }
            Err(err) if err.is_per_sample() => {
                warn!("worker {} dropped sample {}: {}", name, task.index, err);
                let dropped = Dropped {
                    generation: task.generation,
                    index: task.index,
                    reason: err.to_string(),
                };
                if context.dropped.send(dropped).is_err() {
                    break;
                }
            }
            Err(err) => return Err(err),
        }
    }

    debug!("worker {} exiting", name);
    Ok(())
}

/// Block until the result is queued; `false` once the pipeline shuts down
fn deliver(context: &WorkerContext, delivery: Delivery) -> Result<bool> {
    match &context.results {
        ResultSink::Channel(results) => select! {
            send(results, delivery) -> sent => Ok(sent.is_ok()),
            recv(context.shutdown) -> _ => Ok(false),
        },
        ResultSink::Slots(slots) => {
            let (generation, index, record) = delivery;
            match slots.put((generation, index), record) {
                Ok(()) => Ok(true),
                Err(Error::PipelineClosed) => Ok(false),
                Err(err) => Err(err),
            }
        }
    }
}
