use std::{
    thread,
    time::{Duration, Instant},
};

use csi_slurper::{
    frame::CsiFrame, CaptureConfig, RadioConfig, RxStatus, RxStatusWords, MAX_FRAME_LEN,
};

const RADIO: RadioConfig = RadioConfig {
    rx_chainmask: 0b011,
    channel: 2437,
};

fn csi_rx(tstamp: u64, datalen: u16) -> RxStatus {
    RxStatus {
        tstamp,
        rssi: 41,
        rssi_ctl: [40, 39, 0],
        rate: 0x82,
        datalen,
        words: RxStatusWords::csi_upload(0),
        ..Default::default()
    }
}

#[test]
fn end_to_end_session() {
    let config = CaptureConfig {
        slots: 16,
        read_timeout: Duration::from_millis(100),
    };
    let (mut producer, mut device) = csi_slurper::channel(&config).unwrap();
    device.open();

    // 2 rx, 2 tx, 56 tones at 20 bits
    let csi: Vec<u8> = (0..560).map(|i| i as u8).collect();
    producer.on_payload_arrival(&[0xaa; 100]);
    producer.on_status_arrival(&csi_rx(1_000, 560), &csi, &RADIO);

    let mut buf = vec![0u8; MAX_FRAME_LEN];
    let len = device.read(&mut buf).unwrap();
    assert_eq!(len, 23 + 2 + 560 + 100 + 2);

    let frame = CsiFrame::parse(&buf[..len]).unwrap();
    assert_eq!(frame.status.num_tones, 56);
    assert_eq!(frame.status.chan_bw, 0);
    assert_eq!(frame.status.nr, 2);
    assert_eq!(frame.status.nc, 2);
    assert_eq!(frame.status.csi_len, 560);
    assert_eq!(frame.status.channel, 2437);
    assert_eq!(frame.status.tstamp, 1_000);
    assert_eq!(frame.csi, &csi[..]);
    assert_eq!(frame.payload, &[0xaa; 100][..]);
    let trailer = u16::from_le_bytes([buf[len - 2], buf[len - 1]]);
    assert_eq!(usize::from(trailer), len - 2);

    let matrix = frame.samples().unwrap();
    assert_eq!(matrix.samples.len(), 2 * 2 * 56);

    let start = Instant::now();
    assert_eq!(device.read(&mut buf).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(100));

    device.close();
    producer.on_payload_arrival(&[0xaa; 100]);
    producer.on_status_arrival(&csi_rx(2_000, 560), &csi, &RADIO);
    assert!(device.store().is_empty());

    let stats = device.stats().snapshot();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.gated, 2);
}

#[test]
fn slow_reader_sees_ordered_gaps() {
    const FRAMES: u64 = 5_000;
    let config = CaptureConfig {
        slots: 8,
        read_timeout: Duration::from_millis(200),
    };
    let (mut producer, mut device) = csi_slurper::channel(&config).unwrap();
    device.open();

    let radio = thread::spawn(move || {
        let csi = [0x33u8; 560];
        for t in 1..=FRAMES {
            producer.on_payload_arrival(&t.to_le_bytes());
            producer.on_status_arrival(&csi_rx(t, 560), &csi, &RADIO);
            if t % 64 == 0 {
                thread::yield_now();
            }
        }
        producer
    });

    let mut last = 0u64;
    let mut seen = 0u64;
    loop {
        let done = radio.is_finished();
        let frame = match device.next_frame().unwrap() {
            Some(frame) => CsiFrame::parse(frame).unwrap(),
            None if done => break,
            None => continue,
        };
        let tstamp = frame.status.tstamp;
        assert!(tstamp > last, "{} delivered after {}", tstamp, last);
        // Payload and status always come from the same frame
        assert_eq!(frame.payload, &tstamp.to_le_bytes()[..]);
        last = tstamp;
        seen += 1;
    }
    let producer = radio.join().unwrap();

    let stats = producer.stats().snapshot();
    assert_eq!(stats.delivered, seen);
    assert_eq!(stats.published, FRAMES - stats.slot_busy);
    // Every published record is either read or dropped for room
    assert_eq!(stats.published, seen + stats.overflowed);
    assert_eq!(last, FRAMES);
}
