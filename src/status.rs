//! Decoding of the receive descriptor status words into a [`CsiPktStatus`].
//!
//! The radio reports every received frame with a handful of status words.
//! Only frames where the hardware uploaded CSI data (and flagged it valid, and
//! typed it as CSI) and that decoded without PHY error turn into records.

use tracing::{trace, warn};

use crate::STATUS_BLOCK_LEN;

// status word 2
const AR_HW_UPLOAD_DATA: u32 = 0x0040_0000;
const AR_HW_UPLOAD_DATA_S: u32 = 22;
// status word 4
const AR_2040: u32 = 0x0000_0002;
const AR_2040_S: u32 = 1;
const AR_RX_NOT_SOUNDING: u32 = 0x0000_0010;
const AR_HW_UPLOAD_DATA_VALID: u32 = 0x0000_0080;
const AR_HW_UPLOAD_DATA_VALID_S: u32 = 7;
// status word 11
const AR_HW_UPLOAD_DATA_TYPE: u32 = 0x0600_0000;
const AR_HW_UPLOAD_DATA_TYPE_S: u32 = 25;

/// Upload data type the hardware uses for CSI
pub const CSI_UPLOAD_TYPE: u8 = 1;
pub const BITS_PER_BYTE: u32 = 8;
/// Width of one real or imaginary CSI value
pub const BITS_PER_SYMBOL: u32 = 10;
pub const BITS_PER_COMPLEX_SYMBOL: u32 = 2 * BITS_PER_SYMBOL;
/// Tone count used when the bandwidth class is not one we know
pub const DEFAULT_TONES: u8 = 56;
/// Most receive chains the chain mask can describe
pub const MAX_CHAINS: usize = 3;

const NUM_BITS_ON: [u8; 1 << MAX_CHAINS] = [
    0, // 000
    1, // 001
    1, // 010
    2, // 011
    1, // 100
    2, // 101
    2, // 110
    3, // 111
];

/// Raw descriptor words that carry the upload and bandwidth flags
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct RxStatusWords {
    pub status2: u32,
    pub status4: u32,
    pub status11: u32,
}

impl RxStatusWords {
    /// Words as the hardware sets them for a valid CSI upload on bandwidth
    /// class `chan_bw` (0 = 20 MHz, 1 = 40 MHz)
    pub fn csi_upload(chan_bw: u8) -> Self {
        Self {
            status2: AR_HW_UPLOAD_DATA,
            status4: AR_HW_UPLOAD_DATA_VALID | ((u32::from(chan_bw) << AR_2040_S) & AR_2040),
            status11: (u32::from(CSI_UPLOAD_TYPE) << AR_HW_UPLOAD_DATA_TYPE_S)
                & AR_HW_UPLOAD_DATA_TYPE,
        }
    }

    /// status2 bit 22: the hardware attached uploaded data to this frame
    pub fn hw_upload_data(&self) -> bool {
        (self.status2 & AR_HW_UPLOAD_DATA) >> AR_HW_UPLOAD_DATA_S == 1
    }

    /// status4 bit 4: frame was not a sounding frame
    pub fn not_sounding(&self) -> bool {
        self.status4 & AR_RX_NOT_SOUNDING != 0
    }

    /// status4 bit 7: the uploaded data is usable
    pub fn hw_upload_data_valid(&self) -> bool {
        (self.status4 & AR_HW_UPLOAD_DATA_VALID) >> AR_HW_UPLOAD_DATA_VALID_S == 1
    }

    /// status11 bits 25..=26: what kind of data was uploaded
    pub fn hw_upload_data_type(&self) -> u8 {
        ((self.status11 & AR_HW_UPLOAD_DATA_TYPE) >> AR_HW_UPLOAD_DATA_TYPE_S) as u8
    }

    /// status4 bit 1: bandwidth class, 0 for 20 MHz and 1 for 40 MHz
    pub fn chan_bw(&self) -> u8 {
        ((self.status4 & AR_2040) >> AR_2040_S) as u8
    }

    /// Upload present, valid, and of CSI type
    pub fn is_csi_upload(&self) -> bool {
        self.hw_upload_data()
            && self.hw_upload_data_valid()
            && self.hw_upload_data_type() == CSI_UPLOAD_TYPE
    }
}

/// Per-frame receive status as handed over by the receive path
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct RxStatus {
    /// Hardware timestamp
    pub tstamp: u64,
    /// PHY error code, zero on a clean reception
    pub phyerr: u8,
    pub rssi: u8,
    /// Per chain RSSI on the control channel
    pub rssi_ctl: [u8; MAX_CHAINS],
    /// Hardware rate index
    pub rate: u8,
    /// Length of the uploaded data in bytes
    pub datalen: u16,
    pub words: RxStatusWords,
}

/// Radio configuration at the time of reception
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct RadioConfig {
    pub rx_chainmask: u8,
    /// Channel centre frequency in MHz
    pub channel: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChannelBandwidth {
    Ht20,
    Ht40,
}

impl ChannelBandwidth {
    pub fn from_class(class: u8) -> Option<Self> {
        match class {
            0 => Some(Self::Ht20),
            1 => Some(Self::Ht40),
            _ => None,
        }
    }

    pub const fn num_tones(self) -> u8 {
        match self {
            Self::Ht20 => 56,
            Self::Ht40 => 114,
        }
    }
}

/// Tone count for a bandwidth class. Unknown classes fall back to
/// [`DEFAULT_TONES`] so the stream count math keeps a valid divisor.
pub fn num_tones(chan_bw: u8) -> u8 {
    match ChannelBandwidth::from_class(chan_bw) {
        Some(bw) => bw.num_tones(),
        None => {
            warn!(chan_bw, "Unsupported channel bandwidth, assuming 20 MHz tones");
            DEFAULT_TONES
        }
    }
}

/// Number of active receive chains in the low three bits of `mask`
pub fn nrx_from_chainmask(mask: u8) -> u8 {
    NUM_BITS_ON[usize::from(mask) & (NUM_BITS_ON.len() - 1)]
}

/// Transmit stream count implied by the CSI upload length.
///
/// Only meaningful for frames received without PHY error. A zero divisor
/// (no active chains) gives 0.
pub fn tx_streams(datalen: u16, nr: u8, tones: u8) -> u8 {
    let bits = u32::from(datalen) * BITS_PER_BYTE;
    let divisor = BITS_PER_COMPLEX_SYMBOL * u32::from(nr) * u32::from(tones);
    bits.checked_div(divisor)
        .map_or(0, |nc| u8::try_from(nc).unwrap_or(u8::MAX))
}

/// Allow-list filter: a clean reception carrying a valid CSI upload
pub fn carries_csi(rx: &RxStatus) -> bool {
    rx.phyerr == 0 && rx.words.is_csi_upload()
}

/// Status block leading every record
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct CsiPktStatus {
    pub tstamp: u64,
    pub csi_len: u16,
    pub channel: u16,
    pub phyerr: u8,
    /// Not measured, always zero
    pub noise: u8,
    pub rate: u8,
    pub chan_bw: u8,
    pub num_tones: u8,
    pub nr: u8,
    pub nc: u8,
    pub rssi: u8,
    pub rssi_ctl: [u8; MAX_CHAINS],
}

impl CsiPktStatus {
    /// Packed little-endian layout used on the wire
    pub fn to_le_bytes(&self) -> [u8; STATUS_BLOCK_LEN] {
        let mut out = [0u8; STATUS_BLOCK_LEN];
        out[0..8].copy_from_slice(&self.tstamp.to_le_bytes());
        out[8..10].copy_from_slice(&self.csi_len.to_le_bytes());
        out[10..12].copy_from_slice(&self.channel.to_le_bytes());
        out[12] = self.phyerr;
        out[13] = self.noise;
        out[14] = self.rate;
        out[15] = self.chan_bw;
        out[16] = self.num_tones;
        out[17] = self.nr;
        out[18] = self.nc;
        out[19] = self.rssi;
        out[20..23].copy_from_slice(&self.rssi_ctl);
        out
    }

    pub fn from_le_bytes(bytes: &[u8; STATUS_BLOCK_LEN]) -> Self {
        let mut tstamp = [0u8; 8];
        tstamp.copy_from_slice(&bytes[0..8]);
        Self {
            tstamp: u64::from_le_bytes(tstamp),
            csi_len: u16::from_le_bytes([bytes[8], bytes[9]]),
            channel: u16::from_le_bytes([bytes[10], bytes[11]]),
            phyerr: bytes[12],
            noise: bytes[13],
            rate: bytes[14],
            chan_bw: bytes[15],
            num_tones: bytes[16],
            nr: bytes[17],
            nc: bytes[18],
            rssi: bytes[19],
            rssi_ctl: [bytes[20], bytes[21], bytes[22]],
        }
    }
}

/// Turn a frame's raw status into a record status, or `None` if the frame
/// carries no CSI of interest.
///
/// `csi_len` is the untruncated upload length; clamping to the record's
/// buffer is the caller's job.
pub fn decode(rx: &RxStatus, radio: &RadioConfig) -> Option<CsiPktStatus> {
    if !carries_csi(rx) {
        trace!(
            phyerr = rx.phyerr,
            upload = rx.words.hw_upload_data(),
            valid = rx.words.hw_upload_data_valid(),
            kind = rx.words.hw_upload_data_type(),
            not_sounding = rx.words.not_sounding(),
            "Skipping frame without CSI"
        );
        return None;
    }
    let chan_bw = rx.words.chan_bw();
    let num_tones = num_tones(chan_bw);
    let nr = nrx_from_chainmask(radio.rx_chainmask);
    let csi_len = if rx.datalen > 0 && rx.words.is_csi_upload() {
        rx.datalen
    } else {
        0
    };
    Some(CsiPktStatus {
        tstamp: rx.tstamp,
        csi_len,
        channel: radio.channel,
        phyerr: rx.phyerr,
        noise: 0,
        rate: rx.rate,
        chan_bw,
        num_tones,
        nr,
        nc: tx_streams(rx.datalen, nr, num_tones),
        rssi: rx.rssi,
        rssi_ctl: rx.rssi_ctl,
    })
}
