//! The task that owns the on-disk log.
//!
//! Writers send events over a channel and wait for an acknowledgement. All
//! appends picked up in one wakeup are fsynced together, so concurrent
//! bookings on different properties share the cost of a disk flush.

use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::EngineError;

/// Upper bound on operations taken off the channel per wakeup.
const MAX_BATCH: usize = 512;

const QUEUE_DEPTH: usize = 4096;

type Ack = oneshot::Sender<io::Result<()>>;

enum JournalOp {
    Append { event: Event, ack: Ack },
    /// Replace the whole log with `events`.
    Rewrite { events: Vec<Event>, ack: Ack },
    AppendCount { reply: oneshot::Sender<u64> },
}

/// Handle to the journal task. Dropping the last handle stops the task once
/// queued operations are done.
pub(super) struct Journal {
    tx: mpsc::Sender<JournalOp>,
}

impl Journal {
    pub(super) fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run(Writer::new(wal), rx));
        Self { tx }
    }

    /// Returns once `event` is on disk.
    pub(super) async fn append(&self, event: Event) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.submit(JournalOp::Append { event, ack }, done).await
    }

    /// Returns once the log holds exactly `events`.
    pub(super) async fn rewrite(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.submit(JournalOp::Rewrite { events, ack }, done).await
    }

    /// Records appended since the last rewrite, or since open.
    pub(super) async fn append_count(&self) -> u64 {
        let (reply, count) = oneshot::channel();
        if self.tx.send(JournalOp::AppendCount { reply }).await.is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    async fn submit(
        &self,
        op: JournalOp,
        done: oneshot::Receiver<io::Result<()>>,
    ) -> Result<(), EngineError> {
        self.tx
            .send(op)
            .await
            .map_err(|_| EngineError::WalError("journal task has stopped".into()))?;
        done.await
            .map_err(|_| EngineError::WalError("journal task dropped the request".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}

struct Writer {
    wal: Wal,
    /// Appends sitting in the write buffer, waiting for the next fsync.
    unsynced: Vec<Ack>,
    /// First I/O failure. Once set the log may end in a torn record, so
    /// every later operation is refused instead of appending after it.
    failed: Option<String>,
}

impl Writer {
    fn new(wal: Wal) -> Self {
        Self {
            wal,
            unsynced: Vec::new(),
            failed: None,
        }
    }

    fn refused(&self) -> Option<io::Error> {
        self.failed
            .as_ref()
            .map(|cause| io::Error::other(format!("journal disabled after earlier failure: {cause}")))
    }

    fn fail(&mut self, e: &io::Error) {
        tracing::error!("journal write failed, refusing further writes: {e}");
        self.failed = Some(e.to_string());
        for ack in self.unsynced.drain(..) {
            let _ = ack.send(Err(io::Error::new(e.kind(), e.to_string())));
        }
    }

    fn buffer(&mut self, event: &Event, ack: Ack) {
        if let Some(e) = self.refused() {
            let _ = ack.send(Err(e));
            return;
        }
        match self.wal.append_buffered(event) {
            Ok(()) => self.unsynced.push(ack),
            Err(e) => {
                // Earlier records in the buffer are in an unknown state too.
                self.unsynced.push(ack);
                self.fail(&e);
            }
        }
    }

    /// Fsync buffered appends and acknowledge them.
    fn sync(&mut self) {
        if self.unsynced.is_empty() {
            return;
        }
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(self.unsynced.len() as f64);
        let started = Instant::now();
        let result = self.wal.flush_sync();
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                for ack in self.unsynced.drain(..) {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => self.fail(&e),
        }
    }

    fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        if let Some(e) = self.refused() {
            return Err(e);
        }
        // A failed temp write leaves the live log untouched.
        Wal::write_compact_file(self.wal.path(), events)?;
        // After a failed swap the open handle may point at a replaced file.
        if let Err(e) = self.wal.swap_compact_file() {
            self.fail(&e);
            return Err(e);
        }
        tracing::debug!("journal rewritten with {} events", events.len());
        Ok(())
    }
}

async fn run(mut writer: Writer, mut rx: mpsc::Receiver<JournalOp>) {
    let mut ops = Vec::with_capacity(MAX_BATCH);
    while rx.recv_many(&mut ops, MAX_BATCH).await > 0 {
        for op in ops.drain(..) {
            match op {
                JournalOp::Append { event, ack } => writer.buffer(&event, ack),
                JournalOp::Rewrite { events, ack } => {
                    // Appends queued ahead of the rewrite land first.
                    writer.sync();
                    let _ = ack.send(writer.rewrite(&events));
                }
                JournalOp::AppendCount { reply } => {
                    let _ = reply.send(writer.wal.appends_since_compact());
                }
            }
        }
        writer.sync();
    }
}
