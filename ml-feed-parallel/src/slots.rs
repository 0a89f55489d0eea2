//! Fixed pool of pre-allocated sample buffers shared by producers and a consumer

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, select, Receiver, Sender};
use static_assertions::assert_impl_all;
use tracing::debug;

use ml_feed_core::{ArrayValue, Error, FieldTemplate, Record, Result, SampleIndex, Value};

/// One slot's backing storage: a byte buffer per template, in template order.
///
/// A write slot must be handed back through [`SlotQueue::commit`]; dropping
/// it shrinks the pool.
#[derive(Debug)]
pub struct WriteSlot {
    id: usize,
    buffers: Vec<Vec<u8>>,
}

impl WriteSlot {
    /// Slot id
    pub fn id(&self) -> usize {
        self.id
    }
}

/// A filled slot held by the reader until it is released
#[derive(Debug)]
pub struct ReadSlot<M> {
    id: usize,
    buffers: Vec<Vec<u8>>,
    meta: M,
    extras: Record,
}

impl<M> ReadSlot<M> {
    /// Slot id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Metadata committed with the slot
    pub fn meta(&self) -> &M {
        &self.meta
    }
}

/// A ring of `capacity` fixed-shape sample buffers.
///
/// Free and filled slots move through two bounded channels, so at most
/// `capacity` samples are in flight. Array fields named by a template are
/// copied into the slot's own buffers; every other field rides along with
/// the slot as an ordinary value. [`SlotQueue::close`] wakes every blocked
/// caller with [`Error::PipelineClosed`].
pub struct SlotQueue<M = SampleIndex> {
    templates: Vec<(String, FieldTemplate)>,
    capacity: usize,
    free_tx: Sender<WriteSlot>,
    free_rx: Receiver<WriteSlot>,
    filled_tx: Sender<ReadSlot<M>>,
    filled_rx: Receiver<ReadSlot<M>>,
    closed: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

assert_impl_all!(SlotQueue<SampleIndex>: Send, Sync);

impl<M: Send> SlotQueue<M> {
    /// Allocate `capacity` slots for the given templates
    pub fn new<I, S>(templates: I, capacity: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldTemplate)>,
        S: Into<String>,
    {
        if capacity == 0 {
            return Err(Error::Construction("slot queue capacity must be positive".into()));
        }
        let templates: Vec<(String, FieldTemplate)> =
            templates.into_iter().map(|(name, template)| (name.into(), template)).collect();

        let (free_tx, free_rx) = channel::bounded(capacity);
        let (filled_tx, filled_rx) = channel::bounded(capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);

        for id in 0..capacity {
            let buffers = templates
                .iter()
                .map(|(_, template)| vec![0u8; template.byte_count()])
                .collect();
            free_tx
                .try_send(WriteSlot { id, buffers })
                .map_err(|_| Error::Construction("slot pool overflow".into()))?;
        }
        debug!(
            "allocated {} slots of {} bytes",
            capacity,
            templates.iter().map(|(_, t)| t.byte_count()).sum::<usize>()
        );

        Ok(Self {
            templates,
            capacity,
            free_tx,
            free_rx,
            filled_tx,
            filled_rx,
            closed: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        })
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Templates of the fields stored in slot buffers
    pub fn templates(&self) -> &[(String, FieldTemplate)] {
        &self.templates
    }

    /// Number of filled slots waiting for the reader
    pub fn filled(&self) -> usize {
        self.filled_rx.len()
    }

    /// Whether [`SlotQueue::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::PipelineClosed)
        } else {
            Ok(())
        }
    }

    /// Take a free slot, blocking until one is available
    pub fn acquire_write(&self) -> Result<WriteSlot> {
        self.check_open()?;
        select! {
            recv(self.free_rx) -> slot => slot.map_err(|_| Error::PipelineClosed),
            recv(self.shutdown_rx) -> _ => Err(Error::PipelineClosed),
        }
    }

    /// Copy `record` into `slot` and publish it to the reader.
    ///
    /// Every templated field must match its template exactly; on a mismatch
    /// the slot goes back to the free pool and nothing is published.
    pub fn commit(&self, mut slot: WriteSlot, meta: M, mut record: Record) -> Result<()> {
        if let Err(err) = self.fill(&mut slot, &mut record) {
            self.release_buffers(slot);
            return Err(err);
        }
        let filled = ReadSlot {
            id: slot.id,
            buffers: slot.buffers,
            meta,
            extras: record,
        };
        // the filled channel holds `capacity` slots, so this never blocks
        self.filled_tx.send(filled).map_err(|_| Error::PipelineClosed)
    }

    fn fill(&self, slot: &mut WriteSlot, record: &mut Record) -> Result<()> {
        for ((name, template), buffer) in self.templates.iter().zip(&mut slot.buffers) {
            let array = match record.get(name) {
                Some(Value::Array(array)) if array.matches(template) => array,
                Some(Value::Array(array)) => return Err(Error::shape_mismatch(name.as_str(), template, array.template())),
                Some(other) => return Err(Error::shape_mismatch(name.as_str(), template, other.kind())),
                None => return Err(Error::shape_mismatch(name.as_str(), template, "nothing")),
            };
            buffer.copy_from_slice(array.as_bytes());
        }
        for (name, _) in &self.templates {
            record.remove(name);
        }
        Ok(())
    }

    /// Take the oldest filled slot, blocking until one is available
    pub fn acquire_read(&self) -> Result<ReadSlot<M>> {
        self.check_open()?;
        select! {
            recv(self.filled_rx) -> slot => slot.map_err(|_| Error::PipelineClosed),
            recv(self.shutdown_rx) -> _ => Err(Error::PipelineClosed),
        }
    }

    /// Like [`SlotQueue::acquire_read`], giving up after `timeout`
    pub fn acquire_read_timeout(&self, timeout: Duration) -> Result<Option<ReadSlot<M>>> {
        self.check_open()?;
        select! {
            recv(self.filled_rx) -> slot => slot.map(Some).map_err(|_| Error::PipelineClosed),
            recv(self.shutdown_rx) -> _ => Err(Error::PipelineClosed),
            default(timeout) => Ok(None),
        }
    }

    /// Copy the slot's values out; templated arrays are rebuilt from the buffers
    pub fn read(&self, slot: &ReadSlot<M>) -> Result<Record> {
        let mut record = slot.extras.clone();
        for ((name, template), buffer) in self.templates.iter().zip(&slot.buffers) {
            record.insert(name.clone(), ArrayValue::from_bytes(template, buffer)?.into());
        }
        Ok(record)
    }

    /// Return a read slot to the free pool
    pub fn release(&self, slot: ReadSlot<M>) {
        self.release_buffers(WriteSlot {
            id: slot.id,
            buffers: slot.buffers,
        });
    }

    fn release_buffers(&self, slot: WriteSlot) {
        // at most `capacity` slots exist, so the free channel has room
        if self.free_tx.try_send(slot).is_err() {
            debug!("dropping a slot released past capacity");
        }
    }

    /// Acquire, fill and publish a slot
    pub fn put(&self, meta: M, record: Record) -> Result<()> {
        let slot = self.acquire_write()?;
        self.commit(slot, meta, record)
    }

    /// Acquire, read and release a slot, waiting at most `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<(M, Record)>> {
        let Some(slot) = self.acquire_read_timeout(timeout)? else {
            return Ok(None);
        };
        let record = self.read(&slot);
        let ReadSlot { id, buffers, meta, .. } = slot;
        self.release_buffers(WriteSlot { id, buffers });
        Ok(Some((meta, record?)))
    }

    /// Wake all blocked callers; every later call fails with [`Error::PipelineClosed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl<M> fmt::Debug for SlotQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotQueue")
            .field("templates", &self.templates)
            .field("capacity", &self.capacity)
            .field("free", &self.free_rx.len())
            .field("filled", &self.filled_rx.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
