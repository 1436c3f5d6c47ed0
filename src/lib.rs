//! Per-packet CSI capture: a fixed ring of record slots filled from the
//! receive path and drained by a single blocking reader.

pub mod capture;
pub mod complex;
pub mod device;
pub mod error;
pub mod frame;
pub mod monitoring;
pub mod status;
pub mod store;

pub use capture::{channel, CaptureConfig, CaptureProducer};
pub use device::CsiDevice;
pub use error::{CaptureError, FrameError};
pub use frame::CsiFrame;
pub use monitoring::{CaptureStats, StatsSnapshot};
pub use status::{CsiPktStatus, RadioConfig, RxStatus, RxStatusWords};

/// CSI buffer per record: 3 rx * 3 tx * 114 tones * 20 bits, rounded up
pub const CSI_BUF_LEN: usize = 2800;
/// Largest link-layer frame we keep
pub const PAYLOAD_BUF_LEN: usize = 1500;
/// Packed size of the status block at the front of every frame
pub const STATUS_BLOCK_LEN: usize = 23;
/// Upper bound of a serialized record (status, two length fields, both buffers)
pub const MAX_FRAME_LEN: usize = STATUS_BLOCK_LEN + 2 + CSI_BUF_LEN + PAYLOAD_BUF_LEN + 2;
/// Ring size used when nothing else is configured
pub const DEFAULT_SLOTS: usize = 16;

// The trailer is a u16
const _: () = assert!(MAX_FRAME_LEN <= u16::MAX as usize);
