//! Unpacking of the raw CSI upload into complex samples.
//!
//! The hardware packs every value as a 10 bit two's complement number into a
//! little-endian bit stream, imaginary part first, ordered by tone, then
//! transmit stream, then receive chain.

use crate::status::BITS_PER_SYMBOL;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// One CSI value as the radio reports it
pub type CsiSample = Complex<i16>;

impl CsiSample {
    pub fn norm_sq(self) -> u32 {
        let re = u32::from(self.re.unsigned_abs());
        let im = u32::from(self.im.unsigned_abs());
        re * re + im * im
    }
}

/// All samples of one frame, `tones x nc x nr`
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CsiMatrix {
    pub nr: usize,
    pub nc: usize,
    pub tones: usize,
    pub samples: Vec<CsiSample>,
}

impl CsiMatrix {
    pub fn get(&self, tone: usize, tx: usize, rx: usize) -> Option<CsiSample> {
        if tone >= self.tones || tx >= self.nc || rx >= self.nr {
            return None;
        }
        self.samples
            .get((tone * self.nc + tx) * self.nr + rx)
            .copied()
    }

    /// Mean power over every sample, zero for an empty matrix
    pub fn mean_power(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|s| u64::from(s.norm_sq())).sum();
        total as f32 / self.samples.len() as f32
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    acc: u32,
    bits: u32,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            acc: 0,
            bits: 0,
        }
    }

    /// Next signed `BITS_PER_SYMBOL` wide value. Caller checks the length.
    fn symbol(&mut self) -> i16 {
        while self.bits < BITS_PER_SYMBOL {
            self.acc |= u32::from(self.bytes[self.pos]) << self.bits;
            self.pos += 1;
            self.bits += 8;
        }
        let raw = (self.acc & ((1 << BITS_PER_SYMBOL) - 1)) as u16;
        self.acc >>= BITS_PER_SYMBOL;
        self.bits -= BITS_PER_SYMBOL;
        sign_extend(raw, BITS_PER_SYMBOL)
    }
}

fn sign_extend(raw: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((raw << shift) as i16) >> shift
}

/// Unpack `nr * nc * tones` samples from a CSI upload, or `None` if `csi`
/// is too short to hold them.
pub fn unpack_csi(csi: &[u8], nr: u8, nc: u8, tones: u8) -> Option<CsiMatrix> {
    let (nr, nc, tones) = (usize::from(nr), usize::from(nc), usize::from(tones));
    let count = nr * nc * tones;
    let bits = count * 2 * BITS_PER_SYMBOL as usize;
    if csi.len() * 8 < bits {
        return None;
    }
    let mut reader = BitReader::new(csi);
    let samples = (0..count)
        .map(|_| {
            let im = reader.symbol();
            let re = reader.symbol();
            Complex::new(re, im)
        })
        .collect();
    Some(CsiMatrix {
        nr,
        nc,
        tones,
        samples,
    })
}
