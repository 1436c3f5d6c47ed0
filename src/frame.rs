//! Record frame layout handed to the reader. All fields little-endian:
//!
//! ```text
//! | status block (23) | payload_len u16 | csi (csi_len) | payload (payload_len) | len u16 |
//! ```
//!
//! The trailing length counts every byte before it, so a reader can tell it
//! got the whole frame.

use crate::{
    complex::{unpack_csi, CsiMatrix},
    error::{CaptureError, FrameError},
    status::CsiPktStatus,
    store::CsiRecord,
    CSI_BUF_LEN, MAX_FRAME_LEN, PAYLOAD_BUF_LEN, STATUS_BLOCK_LEN,
};

const HEADER_LEN: usize = STATUS_BLOCK_LEN + 2;

/// Serialize `record` into the front of `out`, returning the frame length.
/// Fails without writing anything if the frame would not fit.
pub fn encode(record: &CsiRecord, out: &mut [u8]) -> Result<usize, CaptureError> {
    let csi = record.csi();
    let payload = record.payload();
    let body = HEADER_LEN + csi.len() + payload.len();
    let len = body + 2;
    let max = out.len().min(MAX_FRAME_LEN);
    if len > max {
        return Err(CaptureError::FrameTooLarge { len, max });
    }
    let status = CsiPktStatus {
        csi_len: csi.len() as u16,
        ..record.status
    };
    out[..STATUS_BLOCK_LEN].copy_from_slice(&status.to_le_bytes());
    out[STATUS_BLOCK_LEN..HEADER_LEN].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    let csi_end = HEADER_LEN + csi.len();
    out[HEADER_LEN..csi_end].copy_from_slice(csi);
    out[csi_end..body].copy_from_slice(payload);
    out[body..len].copy_from_slice(&(body as u16).to_le_bytes());
    Ok(len)
}

/// A frame borrowed out of a byte buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CsiFrame<'a> {
    pub status: CsiPktStatus,
    pub csi: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> CsiFrame<'a> {
    /// Parse the frame at the front of `bytes`. Anything after it is ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let truncated = |needed| FrameError::Truncated {
            needed,
            available: bytes.len(),
        };
        let header: &[u8; STATUS_BLOCK_LEN] = bytes
            .get(..STATUS_BLOCK_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| truncated(HEADER_LEN))?;
        let status = CsiPktStatus::from_le_bytes(header);
        let payload_len = match bytes.get(STATUS_BLOCK_LEN..HEADER_LEN) {
            Some(b) => usize::from(u16::from_le_bytes([b[0], b[1]])),
            None => return Err(truncated(HEADER_LEN)),
        };
        let csi_len = usize::from(status.csi_len);
        if csi_len > CSI_BUF_LEN {
            return Err(FrameError::CsiTooLong(csi_len));
        }
        if payload_len > PAYLOAD_BUF_LEN {
            return Err(FrameError::PayloadTooLong(payload_len));
        }
        let csi_end = HEADER_LEN + csi_len;
        let body = csi_end + payload_len;
        let trailer = match bytes.get(body..body + 2) {
            Some(b) => usize::from(u16::from_le_bytes([b[0], b[1]])),
            None => return Err(truncated(body + 2)),
        };
        if trailer != body {
            return Err(FrameError::TrailerMismatch {
                expected: body,
                found: trailer,
            });
        }
        Ok(Self {
            status,
            csi: &bytes[HEADER_LEN..csi_end],
            payload: &bytes[csi_end..body],
        })
    }

    /// Bytes this frame takes on the wire, trailer included
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.csi.len() + self.payload.len() + 2
    }

    /// Unpack the CSI upload into complex samples, if it holds as many as the
    /// status claims
    pub fn samples(&self) -> Option<CsiMatrix> {
        unpack_csi(
            self.csi,
            self.status.nr,
            self.status.nc,
            self.status.num_tones,
        )
    }
}

/// Walks the frames of a capture file laid end to end. Stops after the first
/// error.
pub struct FrameIter<'a> {
    bytes: &'a [u8],
    failed: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            failed: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<CsiFrame<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bytes.is_empty() {
            return None;
        }
        match CsiFrame::parse(self.bytes) {
            Ok(frame) => {
                self.bytes = &self.bytes[frame.encoded_len()..];
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
