//! A stand-in for the radio's receive path.
//!
//! The real driver calls the two capture hooks from its receive completion.
//! Here a thread does the same at a fixed rate with made-up frames: mostly
//! CSI uploads, some beacons without CSI and the odd PHY error, so the
//! filter and the counters get exercised too.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use csi_slurper::{
    status::{nrx_from_chainmask, BITS_PER_COMPLEX_SYMBOL},
    CaptureProducer, RadioConfig, RxStatus, RxStatusWords,
};
use tracing::{debug, info};

// 802.11 beacon frame control
const BEACON_FC: [u8; 2] = [0x80, 0x00];
const DATA_FC: [u8; 2] = [0x08, 0x01];

pub struct SimulatedRadio {
    pub config: RadioConfig,
    /// Frames per second
    pub rate: u32,
    /// Transmit streams of the simulated peer
    pub tx_streams: u8,
}

impl SimulatedRadio {
    fn csi_len(&self, tones: usize) -> usize {
        let nr = usize::from(nrx_from_chainmask(self.config.rx_chainmask));
        let bits = nr * usize::from(self.tx_streams) * tones * BITS_PER_COMPLEX_SYMBOL as usize;
        (bits + 7) / 8
    }

    /// Receive frames until `running` goes false
    pub fn run(self, mut producer: CaptureProducer, running: Arc<AtomicBool>) {
        let period = Duration::from_secs(1) / self.rate;
        let start = Instant::now();
        let mut payload = Vec::with_capacity(256);
        let mut csi = vec![0u8; csi_slurper::CSI_BUF_LEN];
        let mut seq = 0u64;
        info!(rate = self.rate, channel = self.config.channel, "Simulated radio up");
        while running.load(Ordering::Relaxed) {
            seq += 1;
            let tstamp = start.elapsed().as_micros() as u64;
            // Every 10th frame a beacon, every 97th corrupted
            let beacon = seq % 10 == 0;
            let phyerr = if seq % 97 == 0 { 5 } else { 0 };
            // Alternate between 20 and 40 MHz in long runs
            let chan_bw = ((seq / 500) % 2) as u8;
            let tones = usize::from(csi_slurper::status::num_tones(chan_bw));
            let datalen = if beacon { 0 } else { self.csi_len(tones) };

            payload.clear();
            payload.extend_from_slice(if beacon { &BEACON_FC } else { &DATA_FC });
            payload.extend_from_slice(&seq.to_le_bytes());
            payload.resize(64 + (seq % 128) as usize, 0xaa);

            for (i, b) in csi[..datalen].iter_mut().enumerate() {
                *b = (i as u64 ^ seq) as u8;
            }
            let rx = RxStatus {
                tstamp,
                phyerr,
                rssi: 40 + (seq % 7) as u8,
                rssi_ctl: [38, 36, 35],
                rate: 0x80 | (seq % 8) as u8,
                datalen: datalen as u16,
                words: if beacon {
                    RxStatusWords::default()
                } else {
                    RxStatusWords::csi_upload(chan_bw)
                },
            };
            producer.on_payload_arrival(&payload);
            producer.on_status_arrival(&rx, &csi[..datalen], &self.config);
            thread::sleep(period);
        }
        debug!(frames = seq, stats = %producer.stats().snapshot(), "Simulated radio down");
    }
}
