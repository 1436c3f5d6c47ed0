//! This module contains all the capture logic.
//!
//! The receive path calls into a [`CaptureProducer`] twice per frame: once
//! when the payload lands and once when the descriptor status is known. These
//! callbacks run where sleeping is not an option, so they never block, never
//! allocate and never fail. Anything they can't keep is counted in
//! [`CaptureStats`] and dropped.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::{
    device::CsiDevice,
    error::CaptureError,
    monitoring::{bump, CaptureStats},
    status::{self, RadioConfig, RxStatus},
    store::RecordStore,
    DEFAULT_SLOTS,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Record slots in the ring, a power of two. One is kept for staging.
    pub slots: usize,
    /// How long a read waits for a record before returning nothing
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.slots < 2 || !self.slots.is_power_of_two() {
            return Err(CaptureError::InvalidSlotCount(self.slots));
        }
        if self.read_timeout.is_zero() {
            return Err(CaptureError::ZeroTimeout);
        }
        Ok(())
    }
}

/// On while the consumer endpoint is open. Every open starts a new session so
/// a payload staged before a close/open cycle can't be finalized after it.
#[derive(Default, Debug)]
pub struct RecordingGate {
    recording: AtomicBool,
    session: AtomicU64,
}

impl RecordingGate {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    pub(crate) fn open(&self) {
        self.session.fetch_add(1, Ordering::AcqRel);
        self.recording.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.recording.store(false, Ordering::Release);
    }
}

/// State reachable from both the receive path and the reader
pub(crate) struct Shared {
    pub(crate) store: RecordStore,
    pub(crate) gate: RecordingGate,
    pub(crate) stats: CaptureStats,
}

/// Build the one capture instance and split it into its receive-path half and
/// its reader half.
pub fn channel(config: &CaptureConfig) -> Result<(CaptureProducer, CsiDevice), CaptureError> {
    config.validate()?;
    let shared = Arc::new(Shared {
        store: RecordStore::new(config.slots),
        gate: RecordingGate::default(),
        stats: CaptureStats::default(),
    });
    // A single pending token is all the reader needs to recheck the ring
    let (wake_tx, wake_rx) = bounded(1);
    let producer = CaptureProducer {
        shared: shared.clone(),
        wake: wake_tx,
        staged: Staged::Nothing,
    };
    let device = CsiDevice::new(shared, wake_rx, config.read_timeout);
    Ok((producer, device))
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Staged {
    Nothing,
    /// Payload sits in the staging slot for this session
    Payload { session: u64 },
}

/// Receive-path half of the capture. Not `Clone`: there is one producer.
pub struct CaptureProducer {
    shared: Arc<Shared>,
    wake: Sender<()>,
    staged: Staged,
}

impl CaptureProducer {
    /// First half of a frame: stage its payload into the head slot.
    ///
    /// Makes room first, so a full ring loses its oldest unread record even if
    /// this frame is later filtered out.
    pub fn on_payload_arrival(&mut self, data: &[u8]) {
        let shared = &*self.shared;
        if !shared.gate.is_recording() {
            bump(&shared.stats.gated);
            return;
        }
        if self.staged != Staged::Nothing {
            debug!("Payload arrived before the previous frame's status, replacing it");
            self.staged = Staged::Nothing;
        }
        if shared.store.make_room() {
            bump(&shared.stats.overflowed);
            debug!("Ring full, dropped the oldest unread record");
        }
        // Safety: `CaptureProducer` is the only producer and isn't Clone
        let truncated = unsafe { shared.store.with_staging(|rec| rec.set_payload(data)) };
        match truncated {
            None => {
                bump(&shared.stats.slot_busy);
                debug!("Reader still holds the staging slot, dropping frame");
                return;
            }
            Some(true) => {
                bump(&shared.stats.truncated);
                warn!(len = data.len(), "Payload larger than a record, truncated");
            }
            Some(false) => {}
        }
        self.staged = Staged::Payload {
            session: shared.gate.session(),
        };
    }

    /// Second half of a frame: decode the status, attach the CSI upload and
    /// publish the record.
    ///
    /// `csi` is the uploaded data the hardware delivered with this frame;
    /// `rx.datalen` bytes of it are kept.
    pub fn on_status_arrival(&mut self, rx: &RxStatus, csi: &[u8], radio: &RadioConfig) {
        let shared = &*self.shared;
        if !shared.gate.is_recording() {
            bump(&shared.stats.gated);
            return;
        }
        let session = match std::mem::replace(&mut self.staged, Staged::Nothing) {
            Staged::Payload { session } => session,
            Staged::Nothing => {
                bump(&shared.stats.orphaned_status);
                debug!(tstamp = rx.tstamp, "Status without a staged payload, discarding");
                return;
            }
        };
        if session != shared.gate.session() {
            debug!("Staged payload belongs to an earlier session, discarding");
            return;
        }
        let status = match status::decode(rx, radio) {
            Some(status) => status,
            None => {
                bump(&shared.stats.filtered);
                return;
            }
        };
        // Safety: see `on_payload_arrival`
        let truncated = unsafe {
            shared.store.with_staging(|rec| {
                rec.status = status;
                rec.set_csi(csi)
            })
        };
        match truncated {
            None => {
                bump(&shared.stats.slot_busy);
                debug!("Reader still holds the staging slot, dropping frame");
                return;
            }
            Some(true) => {
                bump(&shared.stats.truncated);
                warn!(
                    datalen = rx.datalen,
                    supplied = csi.len(),
                    "CSI upload larger than a record or short of its length, truncated"
                );
            }
            Some(false) => {}
        }
        shared.store.publish();
        bump(&shared.stats.published);
        // Full means a wake-up is already pending
        let _ = self.wake.try_send(());
    }

    pub fn is_recording(&self) -> bool {
        self.shared.gate.is_recording()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.shared.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RxStatusWords;

    const RADIO: RadioConfig = RadioConfig {
        rx_chainmask: 0b011,
        channel: 5180,
    };

    fn csi_status(tstamp: u64, datalen: u16) -> RxStatus {
        RxStatus {
            tstamp,
            datalen,
            words: RxStatusWords::csi_upload(0),
            ..Default::default()
        }
    }

    fn setup(slots: usize) -> (CaptureProducer, CsiDevice) {
        let config = CaptureConfig {
            slots,
            read_timeout: Duration::from_millis(20),
        };
        channel(&config).unwrap()
    }

    fn frame(producer: &mut CaptureProducer, tstamp: u64) {
        producer.on_payload_arrival(&tstamp.to_le_bytes());
        producer.on_status_arrival(&csi_status(tstamp, 16), &[0x5a; 16], &RADIO);
    }

    #[test]
    fn test_config_validation() {
        assert!(CaptureConfig::default().validate().is_ok());
        let bad = CaptureConfig {
            slots: 12,
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(CaptureError::InvalidSlotCount(12)));
        let bad = CaptureConfig {
            slots: 1,
            ..Default::default()
        };
        assert!(channel(&bad).is_err());
        let bad = CaptureConfig {
            read_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(CaptureError::ZeroTimeout));
    }

    #[test]
    fn test_gate_discipline() {
        let (mut producer, device) = setup(8);
        frame(&mut producer, 1);
        assert!(device.store().is_empty());
        assert_eq!(device.store().head(), 0);
        assert_eq!(device.store().tail(), 0);
        assert_eq!(producer.stats().snapshot().gated, 2);
    }

    #[test]
    fn test_publish_advances_head() {
        let (mut producer, mut device) = setup(8);
        device.open();
        producer.on_payload_arrival(&[1, 2, 3]);
        // Staged but not yet published
        assert!(device.store().is_empty());
        producer.on_status_arrival(&csi_status(7, 16), &[0u8; 16], &RADIO);
        assert_eq!(device.store().len(), 1);
        assert_eq!(producer.stats().snapshot().published, 1);
    }

    #[test]
    fn test_status_without_payload() {
        let (mut producer, mut device) = setup(8);
        device.open();
        producer.on_status_arrival(&csi_status(1, 16), &[0u8; 16], &RADIO);
        assert!(device.store().is_empty());
        frame(&mut producer, 2);
        // The second status of a pair doesn't reuse the first payload
        producer.on_status_arrival(&csi_status(3, 16), &[0u8; 16], &RADIO);
        assert_eq!(device.store().len(), 1);
        assert_eq!(producer.stats().snapshot().orphaned_status, 2);
    }

    #[test]
    fn test_filtered_frame_not_published() {
        let (mut producer, mut device) = setup(8);
        device.open();
        producer.on_payload_arrival(&[0u8; 40]);
        let rx = RxStatus {
            phyerr: 3,
            ..csi_status(1, 16)
        };
        producer.on_status_arrival(&rx, &[0u8; 16], &RADIO);
        producer.on_payload_arrival(&[0u8; 40]);
        producer.on_status_arrival(&RxStatus::default(), &[], &RADIO);
        assert!(device.store().is_empty());
        let stats = producer.stats().snapshot();
        assert_eq!(stats.filtered, 2);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn test_overflow_counts() {
        let (mut producer, mut device) = setup(4);
        device.open();
        for i in 0..10 {
            frame(&mut producer, i);
        }
        assert_eq!(device.store().len(), 3);
        assert_eq!(producer.stats().snapshot().overflowed, 7);
    }

    #[test]
    fn test_payload_truncation_counted() {
        let (mut producer, mut device) = setup(4);
        device.open();
        producer.on_payload_arrival(&[0xee; 4000]);
        producer.on_status_arrival(&csi_status(1, 16), &[0u8; 16], &RADIO);
        assert_eq!(producer.stats().snapshot().truncated, 1);
        assert_eq!(producer.stats().snapshot().published, 1);
    }

    #[test]
    fn test_stale_session_payload_discarded() {
        let (mut producer, mut device) = setup(4);
        device.open();
        producer.on_payload_arrival(&[1u8; 10]);
        device.close();
        device.open();
        producer.on_status_arrival(&csi_status(1, 16), &[0u8; 16], &RADIO);
        assert!(device.store().is_empty());
    }
}
