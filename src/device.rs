//! Reader half of the capture, shaped like a character device: open starts a
//! session, close ends it, and read hands out one record frame at a time.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, trace};

use crate::{
    capture::Shared,
    error::CaptureError,
    frame,
    monitoring::{bump, CaptureStats},
    store::RecordStore,
    MAX_FRAME_LEN,
};

/// The single consumer endpoint. Reads take `&mut self` and the type isn't
/// `Clone`, so there is never more than one waiter.
pub struct CsiDevice {
    shared: Arc<Shared>,
    wake: Receiver<()>,
    timeout: Duration,
    // Reused transmit buffer, big enough for any record
    tx: Box<[u8]>,
}

impl CsiDevice {
    pub(crate) fn new(shared: Arc<Shared>, wake: Receiver<()>, timeout: Duration) -> Self {
        Self {
            shared,
            wake,
            timeout,
            tx: vec![0u8; MAX_FRAME_LEN].into_boxed_slice(),
        }
    }

    /// Start a fresh capture session. Anything still buffered from an earlier
    /// session is discarded.
    pub fn open(&mut self) {
        if self.is_open() {
            debug!("Device opened while already recording, restarting session");
        }
        self.shared.store.clear();
        while self.wake.try_recv().is_ok() {}
        self.shared.gate.open();
        info!(session = self.shared.gate.session(), "CSI device open, recording");
    }

    /// Stop recording. Records already buffered may still be read but are not
    /// guaranteed to survive the next open.
    pub fn close(&mut self) {
        if self.is_open() {
            self.shared.gate.close();
            info!(stats = %self.shared.stats.snapshot(), "CSI device closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.gate.is_recording()
    }

    /// Copy the oldest record's frame into `buf`, waiting up to the read
    /// timeout for one to show up. Returns the frame length, or 0 if the
    /// timeout passed with nothing to read.
    ///
    /// If `buf` is too small for the frame, nothing is copied and the record
    /// stays queued.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        match self.take_oldest(buf.len())? {
            Some(len) => {
                buf[..len].copy_from_slice(&self.tx[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    /// Like [`read`](Self::read) but lends out the transmit buffer instead of
    /// copying. `None` on timeout.
    pub fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError> {
        Ok(self.take_oldest(usize::MAX)?.map(|len| &self.tx[..len]))
    }

    /// Control channel, reserved. Accepts nothing.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        debug!(len = buf.len(), "Ignoring control write");
        0
    }

    pub fn read_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.shared.stats
    }

    pub fn store(&self) -> &RecordStore {
        &self.shared.store
    }

    /// Serialize the oldest record into `tx` and retire it, waiting for one
    /// if the ring is empty. `room` is how much the caller can take.
    fn take_oldest(&mut self, room: usize) -> Result<Option<usize>, CaptureError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let store = &self.shared.store;
            let tx = &mut self.tx;
            if let Some((tail, encoded)) = store.read_oldest(|rec| frame::encode(rec, tx)) {
                let len = match encoded {
                    Ok(len) => len,
                    Err(e) => {
                        // Skip it, or every later read fails on the same record
                        store.release(tail);
                        return Err(e);
                    }
                };
                if len > room {
                    return Err(CaptureError::BufferTooSmall {
                        needed: len,
                        available: room,
                    });
                }
                if !store.release(tail) {
                    trace!("Record dropped for room while serializing, retrying");
                    continue;
                }
                bump(&self.shared.stats.delivered);
                return Ok(Some(len));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bump(&self.shared.stats.timeouts);
                return Ok(None);
            }
            match self.wake.recv_timeout(remaining) {
                // Either way, look at the ring again
                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Producer is gone, nothing more will arrive");
                    bump(&self.shared.stats.timeouts);
                    return Ok(None);
                }
            }
        }
    }
}

impl Drop for CsiDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        capture::{channel, CaptureConfig, CaptureProducer},
        frame::CsiFrame,
        status::{RadioConfig, RxStatus, RxStatusWords},
        CaptureError, CsiDevice, MAX_FRAME_LEN,
    };
    use std::{thread, time::Duration, time::Instant};

    const RADIO: RadioConfig = RadioConfig {
        rx_chainmask: 0b001,
        channel: 2412,
    };

    fn setup(slots: usize, timeout_ms: u64) -> (CaptureProducer, CsiDevice) {
        let config = CaptureConfig {
            slots,
            read_timeout: Duration::from_millis(timeout_ms),
        };
        channel(&config).unwrap()
    }

    fn publish(producer: &mut CaptureProducer, tstamp: u64, payload: &[u8]) {
        let rx = RxStatus {
            tstamp,
            datalen: 280,
            words: RxStatusWords::csi_upload(0),
            ..Default::default()
        };
        producer.on_payload_arrival(payload);
        producer.on_status_arrival(&rx, &[0x11; 280], &RADIO);
    }

    fn read_tstamp(device: &mut CsiDevice) -> Option<u64> {
        let frame = device.next_frame().unwrap()?;
        Some(CsiFrame::parse(frame).unwrap().status.tstamp)
    }

    #[test]
    fn test_fifo_reads() {
        let (mut producer, mut device) = setup(16, 10);
        device.open();
        for t in 0..12 {
            publish(&mut producer, t, &[t as u8; 30]);
        }
        let got: Vec<u64> = std::iter::from_fn(|| read_tstamp(&mut device)).collect();
        assert_eq!(got, (0..12).collect::<Vec<_>>());
        assert_eq!(device.stats().snapshot().delivered, 12);
    }

    #[test]
    fn test_drop_oldest_reads() {
        let (mut producer, mut device) = setup(16, 10);
        device.open();
        let cap = device.store().capacity() as u64;
        for t in 0..=cap {
            publish(&mut producer, t, &[1, 2, 3]);
        }
        let got: Vec<u64> = std::iter::from_fn(|| read_tstamp(&mut device)).collect();
        assert_eq!(got, (1..=cap).collect::<Vec<_>>());
    }

    #[test]
    fn test_timeout_returns_zero() {
        let (_producer, mut device) = setup(4, 50);
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let start = Instant::now();
        assert_eq!(device.read(&mut buf).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(device.stats().snapshot().timeouts, 1);
    }

    #[test]
    fn test_read_wakes_on_publish() {
        let (mut producer, mut device) = setup(4, 5000);
        device.open();
        let radio = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publish(&mut producer, 42, &[9u8; 64]);
            producer
        });
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let start = Instant::now();
        let len = device.read(&mut buf).unwrap();
        assert!(len > 0);
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(CsiFrame::parse(&buf[..len]).unwrap().status.tstamp, 42);
        radio.join().unwrap();
    }

    #[test]
    fn test_small_buffer_keeps_record() {
        let (mut producer, mut device) = setup(4, 10);
        device.open();
        publish(&mut producer, 5, &[0u8; 100]);
        let mut small = [0u8; 64];
        assert!(matches!(
            device.read(&mut small),
            Err(CaptureError::BufferTooSmall { available: 64, .. })
        ));
        assert_eq!(read_tstamp(&mut device), Some(5));
    }

    #[test]
    fn test_open_starts_fresh_session() {
        let (mut producer, mut device) = setup(8, 10);
        device.open();
        publish(&mut producer, 1, &[0u8; 4]);
        device.close();
        publish(&mut producer, 2, &[0u8; 4]);
        // Close doesn't throw away what was already there
        assert_eq!(device.store().len(), 1);
        device.open();
        assert!(device.store().is_empty());
        publish(&mut producer, 3, &[0u8; 4]);
        assert_eq!(read_tstamp(&mut device), Some(3));
        assert_eq!(read_tstamp(&mut device), None);
    }

    #[test]
    fn test_disconnected_producer_returns_early() {
        let (producer, mut device) = setup(4, 5000);
        drop(producer);
        let start = Instant::now();
        assert_eq!(device.next_frame().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_write_is_reserved() {
        let (_producer, mut device) = setup(4, 10);
        assert_eq!(device.write(b"rate=6"), 0);
    }
}
