//! Handoff queues between stages.
//!
//! A handoff queue is a circular buffer of `C` pages in L1 shared by exactly
//! one producer stage and one consumer stage:
//!
//! ```text
//!              reserve()                 commit()
//!   producer ◄──────────── free ring ◄─┐  ────────────► filled ring ──┐
//!                                      │                              │
//!                           release()  └──────── consumer ◄───────────┘
//!                                                          wait()
//! ```
//!
//! Pages circulate as owned values, so a page cannot be committed or released
//! twice. Both rings are bounded at `C`, which gives full backpressure: the
//! producer blocks in `reserve()` while all pages are FULL, the consumer blocks
//! in `wait()` while all are EMPTY. With `C = 1` this is a rendezvous slot with
//! strict FULL/EMPTY alternation.
//!
//! Handing a queue a page it did not hand out, or committing/releasing with no
//! outstanding reserve/wait, is a logic error and panics.

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use crate::error::StageFault;

/// One circular buffer page.
#[derive(Debug)]
pub struct Page {
    queue: u8,
    slot: usize,
    seq: u64,
    capacity: usize,
    data: BytesMut,
}

impl Page {
    /// Queue index this page belongs to
    pub const fn queue(&self) -> u8 {
        self.queue
    }

    /// Slot within the queue
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Sequence number assigned at commit (0 for the first chunk)
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Page capacity in bytes
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written by the producer
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes written
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append bytes to the page.
    ///
    /// # Panics
    ///
    /// Panics if the page would exceed its capacity.
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(
            self.data.len() + bytes.len() <= self.capacity,
            "c{} page overflow: {} + {} > {} bytes",
            self.queue,
            self.data.len(),
            bytes.len(),
            self.capacity
        );
        self.data.extend_from_slice(bytes);
    }
}

/// Counters for one queue, shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Queue index
    pub index: u8,
    /// Pages in the queue
    pub capacity: usize,
    /// Pages committed by the producer
    pub committed: u64,
    /// Pages released by the consumer
    pub released: u64,
    /// Most FULL pages observed at once
    pub high_water: usize,
}

#[derive(Debug)]
struct Shared {
    index: u8,
    capacity: usize,
    ready: AtomicUsize,
    high_water: AtomicUsize,
    committed: AtomicU64,
    released: AtomicU64,
}

impl Shared {
    fn stats(&self) -> QueueStats {
        QueueStats {
            index: self.index,
            capacity: self.capacity,
            committed: self.committed.load(Ordering::Acquire),
            released: self.released.load(Ordering::Acquire),
            high_water: self.high_water.load(Ordering::Acquire),
        }
    }
}

/// Read-only view of a queue's counters that outlives both endpoints.
#[derive(Debug, Clone)]
pub struct QueueMonitor {
    shared: Arc<Shared>,
}

impl QueueMonitor {
    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }
}

/// Create a handoff queue of `pages` pages of `page_bytes` bytes each.
///
/// # Panics
///
/// Panics if `pages` is zero.
pub fn handoff_queue(index: u8, pages: usize, page_bytes: usize) -> (QueueProducer, QueueConsumer) {
    assert!(pages > 0, "c{index}: a handoff queue needs at least one page");

    let (free_tx, free_rx) = bounded(pages);
    let (filled_tx, filled_rx) = bounded(pages);

    for slot in 0..pages {
        let page = Page {
            queue: index,
            slot,
            seq: 0,
            capacity: page_bytes,
            data: BytesMut::with_capacity(page_bytes),
        };
        // Fresh channel with room for exactly `pages` items.
        let _ = free_tx.send(page);
    }

    let shared = Arc::new(Shared {
        index,
        capacity: pages,
        ready: AtomicUsize::new(0),
        high_water: AtomicUsize::new(0),
        committed: AtomicU64::new(0),
        released: AtomicU64::new(0),
    });

    (
        QueueProducer {
            shared: Arc::clone(&shared),
            free_rx,
            filled_tx,
            reserved: 0,
            next_seq: 0,
        },
        QueueConsumer {
            shared,
            filled_rx,
            free_tx,
            waited: 0,
            expected_seq: 0,
        },
    )
}

/// Producer end of a handoff queue.
#[derive(Debug)]
pub struct QueueProducer {
    shared: Arc<Shared>,
    free_rx: Receiver<Page>,
    filled_tx: Sender<Page>,
    reserved: usize,
    next_seq: u64,
}

impl QueueProducer {
    /// Queue index
    pub fn index(&self) -> u8 {
        self.shared.index
    }

    /// Pages in the queue
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Pages currently FULL
    pub fn ready(&self) -> usize {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    /// Counter view that stays valid after the endpoints are gone
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until a page is EMPTY and take it for writing.
    ///
    /// # Errors
    ///
    /// `StageFault::Timeout` if `deadline` passes first, `Disconnected` if
    /// the consumer is gone and no free page is left.
    pub fn reserve(&mut self, deadline: Option<Instant>) -> Result<Page, StageFault> {
        let mut page = recv_page(&self.free_rx, deadline, self.shared.index, "reserve")?;
        page.data.clear();
        self.reserved += 1;
        Ok(page)
    }

    /// Mark a reserved page FULL and hand it to the consumer.
    ///
    /// # Errors
    ///
    /// `StageFault::Disconnected` if the consumer is gone.
    ///
    /// # Panics
    ///
    /// Panics if the page came from a different queue or nothing is reserved.
    pub fn commit(&mut self, mut page: Page) -> Result<(), StageFault> {
        let index = self.shared.index;
        assert_eq!(
            page.queue, index,
            "page from c{} committed to c{index}",
            page.queue
        );
        assert!(self.reserved > 0, "c{index}: commit without a reservation");
        self.reserved -= 1;

        page.seq = self.next_seq;
        self.next_seq += 1;

        // Count the page FULL before the consumer can see it.
        let ready = self.shared.ready.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            ready <= self.shared.capacity,
            "c{index}: {ready} FULL pages in a {}-page queue",
            self.shared.capacity
        );

        if self.filled_tx.send(page).is_err() {
            self.shared.ready.fetch_sub(1, Ordering::AcqRel);
            return Err(StageFault::Disconnected { queue: index });
        }
        self.shared.high_water.fetch_max(ready, Ordering::AcqRel);
        self.shared.committed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Consumer end of a handoff queue.
#[derive(Debug)]
pub struct QueueConsumer {
    shared: Arc<Shared>,
    filled_rx: Receiver<Page>,
    free_tx: Sender<Page>,
    waited: usize,
    expected_seq: u64,
}

impl QueueConsumer {
    /// Queue index
    pub fn index(&self) -> u8 {
        self.shared.index
    }

    /// Pages in the queue
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Pages currently FULL
    pub fn ready(&self) -> usize {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    /// Counter view that stays valid after the endpoints are gone
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until a page is FULL and take it for reading.
    ///
    /// # Errors
    ///
    /// `StageFault::Timeout` if `deadline` passes first, `Disconnected` if
    /// the producer is gone and nothing is left to read.
    ///
    /// # Panics
    ///
    /// Panics if pages arrive out of commit order.
    pub fn wait(&mut self, deadline: Option<Instant>) -> Result<Page, StageFault> {
        let page = recv_page(&self.filled_rx, deadline, self.shared.index, "wait")?;
        assert_eq!(
            page.seq, self.expected_seq,
            "c{}: page out of order",
            self.shared.index
        );
        self.expected_seq += 1;
        self.waited += 1;
        Ok(page)
    }

    /// Mark a page EMPTY and return it to the producer.
    ///
    /// A producer that has already finished no longer needs the page, so
    /// releasing after it exits still succeeds.
    ///
    /// # Errors
    ///
    /// None at present; the `Result` matches the other queue calls.
    ///
    /// # Panics
    ///
    /// Panics if the page came from a different queue or nothing is held.
    pub fn release(&mut self, page: Page) -> Result<(), StageFault> {
        let index = self.shared.index;
        assert_eq!(
            page.queue, index,
            "page from c{} released to c{index}",
            page.queue
        );
        assert!(self.waited > 0, "c{index}: release without a wait");
        self.waited -= 1;

        // Drop the FULL count before the page becomes reservable again.
        self.shared.ready.fetch_sub(1, Ordering::AcqRel);
        self.shared.released.fetch_add(1, Ordering::AcqRel);

        if self.free_tx.send(page).is_err() {
            trace!("c{index}: producer gone, page dropped on release");
        }
        Ok(())
    }
}

fn recv_page(
    rx: &Receiver<Page>,
    deadline: Option<Instant>,
    queue: u8,
    op: &str,
) -> Result<Page, StageFault> {
    match deadline {
        Some(deadline) => rx.recv_deadline(deadline).map_err(|e| match e {
            RecvTimeoutError::Timeout => StageFault::timeout(format!("c{queue} {op}")),
            RecvTimeoutError::Disconnected => StageFault::Disconnected { queue },
        }),
        None => rx.recv().map_err(|_| StageFault::Disconnected { queue }),
    }
}
