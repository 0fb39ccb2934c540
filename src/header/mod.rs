//! Dictionary header: persisted policy and counters.
//!
//! Layout (big-endian):
//!
//! ```text
//! magic u32 | version u16 | flags u16 | locale (varint len + utf8)
//! unigram_count u32 | bigram_count u32
//! max_unigram_count u32 | max_bigram_count u32
//! extended_region_size u32 | last_decayed_time u32
//! time_step_secs u32 | max_level u8 | occurrences_to_level_up u8 | max_elapsed_steps u8
//! ```

use crate::encoding::{decode_bytes, encode_bytes};
use crate::error::{DictError, Result};

pub const MAGIC: u32 = 0x9BC1_3AFE;
pub const FORMAT_VERSION: u16 = 4;

const FLAG_DECAYING: u16 = 0x0001;

pub const DEFAULT_MAX_UNIGRAM_COUNT: u32 = 10_000;
pub const DEFAULT_MAX_BIGRAM_COUNT: u32 = 10_000;

/// Parameters of the forgetting curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecayParams {
    /// Seconds per elapsed time step
    pub time_step_secs: u32,
    /// Highest level an entry can reach
    pub max_level: u8,
    /// Occurrences within one level needed to move up
    pub occurrences_to_level_up: u8,
    /// Elapsed steps after which an entry's probability reaches zero
    pub max_elapsed_steps: u8,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            time_step_secs: 24 * 60 * 60,
            max_level: 3,
            occurrences_to_level_up: 2,
            max_elapsed_steps: 15,
        }
    }
}

/// Persisted policy of one dictionary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderPolicy {
    pub locale: String,
    /// Decaying dictionaries store historical info and enforce the ceilings.
    pub is_decaying: bool,
    pub max_unigram_count: u32,
    pub max_bigram_count: u32,
    pub unigram_count: u32,
    pub bigram_count: u32,
    pub extended_region_size: u32,
    pub last_decayed_time: u32,
    pub decay: DecayParams,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            locale: String::new(),
            is_decaying: false,
            max_unigram_count: DEFAULT_MAX_UNIGRAM_COUNT,
            max_bigram_count: DEFAULT_MAX_BIGRAM_COUNT,
            unigram_count: 0,
            bigram_count: 0,
            extended_region_size: 0,
            last_decayed_time: 0,
            decay: DecayParams::default(),
        }
    }
}

impl HeaderPolicy {
    /// Static (non-decaying) dictionary for `locale`.
    pub fn new_static(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Self::default()
        }
    }

    /// Decaying dictionary with the given ceilings.
    pub fn new_decaying(locale: impl Into<String>, max_unigram_count: u32, max_bigram_count: u32) -> Self {
        Self {
            locale: locale.into(),
            is_decaying: true,
            max_unigram_count,
            max_bigram_count,
            ..Self::default()
        }
    }

    pub fn with_decay_params(mut self, decay: DecayParams) -> Self {
        self.decay = decay;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48 + self.locale.len());
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        let flags = if self.is_decaying { FLAG_DECAYING } else { 0 };
        out.extend_from_slice(&flags.to_be_bytes());
        encode_bytes(self.locale.as_bytes(), &mut out);
        for v in [
            self.unigram_count,
            self.bigram_count,
            self.max_unigram_count,
            self.max_bigram_count,
            self.extended_region_size,
            self.last_decayed_time,
            self.decay.time_step_secs,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.push(self.decay.max_level);
        out.push(self.decay.occurrences_to_level_up);
        out.push(self.decay.max_elapsed_steps);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        if r.u32()? != MAGIC {
            return Err(DictError::InvalidHeader("bad magic"));
        }
        if r.u16()? != FORMAT_VERSION {
            return Err(DictError::InvalidHeader("unsupported format version"));
        }
        let flags = r.u16()?;
        let (locale, used) = decode_bytes(&bytes[r.pos..]).ok_or(DictError::InvalidHeader("truncated locale"))?;
        let locale = std::str::from_utf8(locale)
            .map_err(|_| DictError::InvalidHeader("locale is not utf-8"))?
            .to_owned();
        r.pos += used;

        let unigram_count = r.u32()?;
        let bigram_count = r.u32()?;
        let max_unigram_count = r.u32()?;
        let max_bigram_count = r.u32()?;
        let extended_region_size = r.u32()?;
        let last_decayed_time = r.u32()?;
        let decay = DecayParams {
            time_step_secs: r.u32()?,
            max_level: r.u8()?,
            occurrences_to_level_up: r.u8()?,
            max_elapsed_steps: r.u8()?,
        };
        if decay.time_step_secs == 0 || decay.max_elapsed_steps == 0 {
            return Err(DictError::InvalidHeader("zero decay time step"));
        }
        Ok(Self {
            locale,
            is_decaying: flags & FLAG_DECAYING != 0,
            max_unigram_count,
            max_bigram_count,
            unigram_count,
            bigram_count,
            extended_region_size,
            last_decayed_time,
            decay,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + N)
            .ok_or(DictError::InvalidHeader("truncated header"))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }
}
