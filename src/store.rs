//! Fixed ring of record slots shared by one producer and one consumer.
//!
//! `head` and `tail` count up forever and are reduced modulo the slot count
//! when indexing. The slot at `head` is the producer's staging area and the
//! records in `tail..head` are published. One slot always stays reserved for
//! staging, so at most `slots - 1` records are readable at once.
//!
//! Only the producer moves `head`. The consumer moves `tail` when it is done
//! with a record, and the producer moves it too when it has to drop the oldest
//! record to make room. Both sides advance `tail` with compare-and-swap.
//!
//! Every slot has a `reading` flag the consumer raises while it copies the
//! record out. The producer checks the flag before it writes a staging slot
//! and gives up on the frame instead of waiting when it is raised.

use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{status::CsiPktStatus, CSI_BUF_LEN, PAYLOAD_BUF_LEN};

/// One captured frame: status, CSI upload and link-layer payload
pub struct CsiRecord {
    pub status: CsiPktStatus,
    pub csi: [u8; CSI_BUF_LEN],
    pub payload: [u8; PAYLOAD_BUF_LEN],
    pub payload_len: u16,
}

impl Default for CsiRecord {
    fn default() -> Self {
        Self {
            status: CsiPktStatus::default(),
            csi: [0u8; CSI_BUF_LEN],
            payload: [0u8; PAYLOAD_BUF_LEN],
            payload_len: 0,
        }
    }
}

impl CsiRecord {
    pub fn csi(&self) -> &[u8] {
        &self.csi[..usize::from(self.status.csi_len).min(CSI_BUF_LEN)]
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.payload_len).min(PAYLOAD_BUF_LEN)]
    }

    /// Copy in as much of `data` as fits. Returns true if anything was cut.
    pub fn set_payload(&mut self, data: &[u8]) -> bool {
        let n = data.len().min(PAYLOAD_BUF_LEN);
        self.payload[..n].copy_from_slice(&data[..n]);
        self.payload_len = n as u16;
        n < data.len()
    }

    /// Copy `status.csi_len` bytes of `data` into the CSI buffer, clamping
    /// the length to the buffer and to `data`. Returns true if anything was cut.
    pub fn set_csi(&mut self, data: &[u8]) -> bool {
        let wanted = usize::from(self.status.csi_len);
        let n = wanted.min(CSI_BUF_LEN).min(data.len());
        self.csi[..n].copy_from_slice(&data[..n]);
        self.status.csi_len = n as u16;
        n < wanted
    }
}

struct Slot {
    record: UnsafeCell<CsiRecord>,
    reading: AtomicBool,
}

pub struct RecordStore {
    slots: Box<[Slot]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: slot contents are only reached through `with_staging` (producer,
// unpublished slot, reader flag clear) and `read_oldest` (consumer, published
// slot, reader flag raised and confirmed against `tail`).
unsafe impl Sync for RecordStore {}

impl RecordStore {
    /// Allocate `slots` records up front. `slots` must be a power of two, at least 2.
    pub fn new(slots: usize) -> Self {
        debug_assert!(slots >= 2 && slots.is_power_of_two());
        let slots = (0..slots)
            .map(|_| Slot {
                record: UnsafeCell::new(CsiRecord::default()),
                reading: AtomicBool::new(false),
            })
            .collect();
        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn slot(&self, idx: usize) -> &Slot {
        // Power of two, so the mask is the modulo
        &self.slots[idx & (self.slots.len() - 1)]
    }

    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// How many records can be waiting at once
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Published, unread records. Exact only when both sides are quiet.
    pub fn len(&self) -> usize {
        // tail first: head never falls behind a tail we already saw
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    /// Producer side. Drop the oldest unread record if publishing one more
    /// would overfill the ring. Returns true if a record was dropped.
    pub(crate) fn make_room(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            if head.wrapping_sub(tail) < self.capacity() {
                return false;
            }
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Producer side. Run `f` on the staging slot, or return `None` if the
    /// consumer is still copying it out.
    ///
    /// # Safety
    /// Must only be called from the one producer context, the same one that
    /// calls [`make_room`](Self::make_room) and [`publish`](Self::publish).
    pub(crate) unsafe fn with_staging<R>(&self, f: impl FnOnce(&mut CsiRecord) -> R) -> Option<R> {
        let slot = self.slot(self.head.load(Ordering::Relaxed));
        if slot.reading.load(Ordering::SeqCst) {
            return None;
        }
        Some(f(&mut *slot.record.get()))
    }

    /// Producer side. Make the staging slot visible to the consumer.
    pub(crate) fn publish(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Consumer side. Run `f` on the oldest published record while holding it
    /// against the producer. Returns the record's index for
    /// [`release`](Self::release), or `None` if nothing is published.
    pub(crate) fn read_oldest<R>(&self, f: impl FnOnce(&CsiRecord) -> R) -> Option<(usize, R)> {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            // Check before raising the flag, an empty ring's tail slot is the
            // producer's staging slot
            if self.head.load(Ordering::Acquire) == tail {
                return None;
            }
            let slot = self.slot(tail);
            slot.reading.store(true, Ordering::SeqCst);
            // Dropped by the producer before we got the flag up
            if self.tail.load(Ordering::SeqCst) != tail {
                slot.reading.store(false, Ordering::Release);
                continue;
            }
            // Safety: the slot is published (head moved past it with release
            // ordering) and the producer will not stage into it while the
            // flag is up, even if it drops the record in the meantime.
            let out = f(unsafe { &*slot.record.get() });
            slot.reading.store(false, Ordering::Release);
            return Some((tail, out));
        }
    }

    /// Consumer side. Retire the record at `tail`. Returns false if the
    /// producer already dropped it for room, in which case whatever was read
    /// from it should be discarded.
    pub(crate) fn release(&self, tail: usize) -> bool {
        self.tail
            .compare_exchange(tail, tail.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Consumer side. Forget every published record.
    pub(crate) fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.fetch_max(head, Ordering::SeqCst);
    }
}
