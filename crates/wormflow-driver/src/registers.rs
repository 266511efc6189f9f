//! Destination (accumulation) register bank of the compute stage.
//!
//! Segment lifecycle for one chunk:
//!
//! ```text
//!   acquire ──► ACQUIRED ──commit──► COMPUTED ──wait──► PACKING ──drop──► free
//!               load/apply                              pack_into
//! ```
//!
//! [`SegmentGuard`] returns its segment to the bank when dropped, on every
//! path out of the compute loop, including `?` returns and unwinding.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use crate::element::Element;
use crate::error::StageFault;
use crate::op::BinaryOp;
use crate::queue::Page;

#[derive(Debug)]
struct Segment<E> {
    index: usize,
    data: Vec<E>,
}

/// A fixed bank of accumulation register segments.
#[derive(Debug)]
pub struct RegisterBank<E: Element> {
    free_tx: Sender<Segment<E>>,
    free_rx: Receiver<Segment<E>>,
    segments: usize,
    segment_elements: usize,
}

impl<E: Element> RegisterBank<E> {
    /// Create a bank of `segments` segments, each holding `segment_elements`.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is zero.
    pub fn new(segments: usize, segment_elements: usize) -> Self {
        assert!(segments > 0, "register bank needs at least one segment");
        let (free_tx, free_rx) = bounded(segments);
        for index in 0..segments {
            let _ = free_tx.send(Segment {
                index,
                data: Vec::with_capacity(segment_elements),
            });
        }
        Self {
            free_tx,
            free_rx,
            segments,
            segment_elements,
        }
    }

    /// Total segments
    pub const fn segments(&self) -> usize {
        self.segments
    }

    /// Elements per segment
    pub const fn segment_elements(&self) -> usize {
        self.segment_elements
    }

    /// Segments not currently held by a guard
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Take exclusive ownership of a segment, blocking until one is free.
    ///
    /// # Errors
    ///
    /// `StageFault::Timeout` if `deadline` passes first.
    pub fn acquire(&self, deadline: Option<Instant>) -> Result<SegmentGuard<'_, E>, StageFault> {
        let segment = match deadline {
            Some(deadline) => self.free_rx.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => StageFault::timeout("register segment acquire"),
                RecvTimeoutError::Disconnected => {
                    StageFault::register_bank("bank disconnected")
                }
            })?,
            // The bank holds its own sender, so this only blocks.
            None => self
                .free_rx
                .recv()
                .map_err(|_| StageFault::register_bank("bank disconnected"))?,
        };
        Ok(SegmentGuard {
            bank: self,
            segment,
            state: SegmentState::Acquired,
        })
    }
}

/// Where a held segment is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Owned by math; may be loaded and operated on
    Acquired,
    /// Math is done; result is final
    Computed,
    /// Owned by the packer
    Packing,
}

/// Exclusive handle to one register segment.
#[derive(Debug)]
pub struct SegmentGuard<'a, E: Element> {
    bank: &'a RegisterBank<E>,
    segment: Segment<E>,
    state: SegmentState,
}

impl<E: Element> SegmentGuard<'_, E> {
    /// Segment index within the bank
    pub const fn index(&self) -> usize {
        self.segment.index
    }

    /// Current lifecycle state
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    /// Elements currently held
    pub fn len(&self) -> usize {
        self.segment.data.len()
    }

    /// True if no elements are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents
    pub fn values(&self) -> &[E] {
        &self.segment.data
    }

    /// Copy operand bytes from a page into the segment (unpack).
    ///
    /// # Errors
    ///
    /// `StageFault::RegisterBank` if the operand is ragged or larger than a
    /// segment.
    ///
    /// # Panics
    ///
    /// Panics unless the segment is `Acquired`.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), StageFault> {
        assert_eq!(self.state, SegmentState::Acquired, "load into a committed segment");
        let capacity = self.bank.segment_elements;
        if bytes.len() % E::SIZE != 0 || bytes.len() / E::SIZE > capacity {
            return Err(StageFault::register_bank(format!(
                "operand of {} bytes does not fit a {capacity}-element {} segment",
                bytes.len(),
                E::FORMAT
            )));
        }
        let data = &mut self.segment.data;
        data.clear();
        data.extend(bytes.chunks_exact(E::SIZE).map(bytemuck::pod_read_unaligned::<E>));
        Ok(())
    }

    /// Combine the segment with a second operand in place (math).
    ///
    /// # Errors
    ///
    /// `StageFault::RegisterBank` if the operand length differs from the
    /// loaded one.
    ///
    /// # Panics
    ///
    /// Panics unless the segment is `Acquired`.
    pub fn apply<O>(&mut self, rhs: &[u8], op: &O) -> Result<(), StageFault>
    where
        O: BinaryOp<E> + ?Sized,
    {
        assert_eq!(self.state, SegmentState::Acquired, "math on a committed segment");
        let loaded = self.len();
        if rhs.len() != loaded * E::SIZE {
            return Err(StageFault::register_bank(format!(
                "operand length mismatch: segment holds {loaded} elements, operand has {} bytes",
                rhs.len()
            )));
        }
        for (acc, chunk) in self.segment.data.iter_mut().zip(rhs.chunks_exact(E::SIZE)) {
            *acc = op.apply(*acc, bytemuck::pod_read_unaligned::<E>(chunk));
        }
        Ok(())
    }

    /// Hand the finished segment over to the packer.
    ///
    /// # Panics
    ///
    /// Panics if already committed.
    pub fn commit(&mut self) {
        assert_eq!(self.state, SegmentState::Acquired, "segment committed twice");
        self.state = SegmentState::Computed;
    }

    /// Packer side: wait for a committed segment.
    ///
    /// # Panics
    ///
    /// Panics unless the segment is `Computed`.
    pub fn wait(&mut self) {
        assert_eq!(self.state, SegmentState::Computed, "wait on an uncommitted segment");
        self.state = SegmentState::Packing;
    }

    /// Pack the segment contents into an output page.
    ///
    /// # Panics
    ///
    /// Panics unless the segment is `Packing`, or if the page is too small.
    pub fn pack_into(&self, page: &mut Page) {
        assert_eq!(self.state, SegmentState::Packing, "pack before wait");
        page.write(bytemuck::cast_slice(self.values()));
    }
}

impl<E: Element> Drop for SegmentGuard<'_, E> {
    fn drop(&mut self) {
        let mut data = std::mem::take(&mut self.segment.data);
        data.clear();
        // The bank owns the receiver, so this cannot fail while `bank` lives.
        let _ = self.bank.free_tx.send(Segment {
            index: self.segment.index,
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::encode;
    use crate::op::EltwiseOp;
    use crate::queue::handoff_queue;
    use std::time::Duration;

    #[test]
    fn full_cycle_packs_result() {
        let bank = RegisterBank::<u32>::new(2, 4);
        let mut seg = bank.acquire(None).unwrap();
        seg.load(encode(&[1u32, 2, 3, 4])).unwrap();
        seg.apply(encode(&[10u32, 20, 30, 40]), &EltwiseOp::Add).unwrap();
        seg.commit();
        seg.wait();

        let (mut tx, _rx) = handoff_queue(2, 1, 16);
        let mut page = tx.reserve(None).unwrap();
        seg.pack_into(&mut page);
        assert_eq!(page.bytes(), encode(&[11u32, 22, 33, 44]));
        assert_eq!(bank.available(), 1);
        drop(seg);
        assert_eq!(bank.available(), 2);
    }

    #[test]
    fn fault_path_releases_segment() {
        let bank = RegisterBank::<f32>::new(1, 4);
        let run = || -> Result<(), StageFault> {
            let mut seg = bank.acquire(None)?;
            seg.load(encode(&[1.0f32, 2.0]))?;
            seg.apply(encode(&[1.0f32]), &EltwiseOp::Mul)?;
            Ok(())
        };
        assert!(matches!(run(), Err(StageFault::RegisterBank { .. })));
        assert_eq!(bank.available(), 1);
    }

    #[test]
    fn oversized_operand_rejected() {
        let bank = RegisterBank::<u32>::new(1, 2);
        let mut seg = bank.acquire(None).unwrap();
        assert!(seg.load(encode(&[1u32, 2, 3])).is_err());
        assert!(seg.load(&[0u8; 3]).is_err());
    }

    #[test]
    fn exhausted_bank_times_out() {
        let bank = RegisterBank::<u32>::new(1, 2);
        let _held = bank.acquire(None).unwrap();
        let soon = Instant::now() + Duration::from_millis(10);
        assert_eq!(
            bank.acquire(Some(soon)).unwrap_err(),
            StageFault::timeout("register segment acquire")
        );
    }

    #[test]
    fn segments_rotate() {
        let bank = RegisterBank::<i32>::new(2, 1);
        let a = bank.acquire(None).unwrap();
        let b = bank.acquire(None).unwrap();
        assert_ne!(a.index(), b.index());
    }

    #[test]
    #[should_panic(expected = "segment committed twice")]
    fn double_commit_panics() {
        let bank = RegisterBank::<u32>::new(1, 1);
        let mut seg = bank.acquire(None).unwrap();
        seg.commit();
        seg.commit();
    }

    #[test]
    #[should_panic(expected = "wait on an uncommitted segment")]
    fn wait_before_commit_panics() {
        let bank = RegisterBank::<u32>::new(1, 1);
        let mut seg = bank.acquire(None).unwrap();
        seg.wait();
    }
}
