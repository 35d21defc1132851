//! Read Chunks and Signal Descriptors
//!
//! A [`ReadChunk`] is one segment of raw signal for one channel, as delivered
//! by a single inbound live-reads message. Chunks sharing a
//! `(channel_id, read_number)` pair are continuations of the same read.
//!
//! The raw payload is opaque bytes; [`SignalDataType`] describes how to turn
//! it into samples, and [`ClassificationMap`] names the small integer codes
//! carried in `classification_tags`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read classes accepted by the strand prefilter when none are configured
pub const DEFAULT_PREFILTER_CLASSES: [&str; 2] = ["strand", "adapter"];

/// Predefined classification codes reported by sequencing devices
const PREDEFINED_CLASSES: [(i32, &str); 13] = [
    (83, "strand"),
    (67, "strand1"),
    (77, "multiple"),
    (90, "zero"),
    (65, "adapter"),
    (66, "mux_uncertain"),
    (70, "user2"),
    (68, "user1"),
    (69, "event"),
    (80, "pore"),
    (85, "unavailable"),
    (84, "transition"),
    (78, "unclassed"),
];

// ============================================================================
// Read Chunk
// ============================================================================

/// One segment of acquired signal for one channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadChunk {
    /// Physical channel the chunk was acquired on
    pub channel_id: u32,
    /// Read number on that channel (the nth read seen by the channel)
    pub read_number: u32,
    /// Globally unique read identifier
    pub read_id: String,
    /// Raw sample bytes, encoded as described by a [`SignalDataType`]
    pub raw_payload: Vec<u8>,
    /// Classification codes for this chunk
    pub classification_tags: Vec<i32>,
    /// Sample index since acquisition start of the first sample in the chunk
    pub start_offset: u64,
    /// Number of samples in the chunk
    pub chunk_length: u64,
    /// Median current of the previous read on the channel
    pub median_before: f32,
    /// Median current of this chunk
    pub median: f32,
}

impl ReadChunk {
    /// Create an empty chunk for a read
    #[must_use]
    pub fn new(channel_id: u32, read_number: u32, read_id: impl Into<String>) -> Self {
        Self {
            channel_id,
            read_number,
            read_id: read_id.into(),
            raw_payload: Vec::new(),
            classification_tags: Vec::new(),
            start_offset: 0,
            chunk_length: 0,
            median_before: 0.0,
            median: 0.0,
        }
    }

    /// Set the raw payload
    #[must_use]
    pub fn with_payload(mut self, raw_payload: impl Into<Vec<u8>>) -> Self {
        self.raw_payload = raw_payload.into();
        self
    }

    /// Set the classification tags
    #[must_use]
    pub fn with_classifications(mut self, tags: impl Into<Vec<i32>>) -> Self {
        self.classification_tags = tags.into();
        self
    }

    /// Set the start offset and length (in samples)
    #[must_use]
    pub fn with_samples(mut self, start_offset: u64, chunk_length: u64) -> Self {
        self.start_offset = start_offset;
        self.chunk_length = chunk_length;
        self
    }

    /// Set the median levels
    #[must_use]
    pub fn with_medians(mut self, median_before: f32, median: f32) -> Self {
        self.median_before = median_before;
        self.median = median;
        self
    }

    /// Whether this chunk continues the same read as `other`
    #[must_use]
    pub fn is_same_read(&self, other: &Self) -> bool {
        self.read_number == other.read_number
    }

    /// Whether any classification tag is in `classes`
    #[must_use]
    pub fn has_class_in(&self, classes: &BTreeSet<i32>) -> bool {
        self.classification_tags.iter().any(|tag| classes.contains(tag))
    }

    /// Drop the payload, keeping the metadata
    pub fn clear_payload(&mut self) {
        self.raw_payload = Vec::new();
    }
}

// ============================================================================
// Signal Data Type
// ============================================================================

/// Numeric kind of a raw signal sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Two's-complement signed integer
    SignedInteger,
    /// Unsigned integer
    UnsignedInteger,
    /// IEEE-754 floating point
    FloatingPoint,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedInteger => write!(f, "i"),
            Self::UnsignedInteger => write!(f, "u"),
            Self::FloatingPoint => write!(f, "f"),
        }
    }
}

/// Errors decoding a raw payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalDecodeError {
    /// The kind/width combination has no native representation
    #[error("unsupported sample type {kind}{size}")]
    Unsupported {
        /// Sample kind
        kind: SampleKind,
        /// Sample width in bytes
        size: u8,
    },
    /// Payload length is not a multiple of the sample width
    #[error("payload of {len} bytes is not a whole number of {size}-byte samples")]
    Misaligned {
        /// Payload length in bytes
        len: usize,
        /// Sample width in bytes
        size: u8,
    },
}

type SampleDecoder = fn(&[u8], bool) -> f64;

macro_rules! sample {
    ($ty:ty, $bytes:expr, $big:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        if $big {
            <$ty>::from_be_bytes(buf)
        } else {
            <$ty>::from_le_bytes(buf)
        }
    }};
}

/// Encoding of the raw payload of a [`ReadChunk`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalDataType {
    /// Numeric kind of each sample
    pub kind: SampleKind,
    /// Whether samples are big-endian
    pub big_endian: bool,
    /// Width of one sample in bytes
    pub size: u8,
}

impl SignalDataType {
    /// Little-endian 32-bit float (calibrated signal)
    #[must_use]
    pub const fn calibrated() -> Self {
        Self {
            kind: SampleKind::FloatingPoint,
            big_endian: false,
            size: 4,
        }
    }

    /// Little-endian 16-bit signed integer (uncalibrated ADC signal)
    #[must_use]
    pub const fn uncalibrated() -> Self {
        Self {
            kind: SampleKind::SignedInteger,
            big_endian: false,
            size: 2,
        }
    }

    /// Decode a raw payload into samples
    ///
    /// # Errors
    ///
    /// Returns [`SignalDecodeError::Unsupported`] for widths with no native
    /// type and [`SignalDecodeError::Misaligned`] if the payload has trailing
    /// bytes.
    pub fn decode(&self, raw: &[u8]) -> Result<Vec<f64>, SignalDecodeError> {
        let decoder = self.decoder()?;
        let width = usize::from(self.size);
        if raw.len() % width != 0 {
            return Err(SignalDecodeError::Misaligned {
                len: raw.len(),
                size: self.size,
            });
        }
        Ok(raw
            .chunks_exact(width)
            .map(|bytes| decoder(bytes, self.big_endian))
            .collect())
    }

    /// Number of whole samples in a payload of `len` bytes
    #[must_use]
    pub fn sample_count(&self, len: usize) -> usize {
        match self.size {
            0 => 0,
            size => len / usize::from(size),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn decoder(&self) -> Result<SampleDecoder, SignalDecodeError> {
        let decoder: SampleDecoder = match (self.kind, self.size) {
            (SampleKind::SignedInteger, 1) => |b, big| f64::from(sample!(i8, b, big)),
            (SampleKind::SignedInteger, 2) => |b, big| f64::from(sample!(i16, b, big)),
            (SampleKind::SignedInteger, 4) => |b, big| f64::from(sample!(i32, b, big)),
            (SampleKind::SignedInteger, 8) => |b, big| sample!(i64, b, big) as f64,
            (SampleKind::UnsignedInteger, 1) => |b, big| f64::from(sample!(u8, b, big)),
            (SampleKind::UnsignedInteger, 2) => |b, big| f64::from(sample!(u16, b, big)),
            (SampleKind::UnsignedInteger, 4) => |b, big| f64::from(sample!(u32, b, big)),
            (SampleKind::UnsignedInteger, 8) => |b, big| sample!(u64, b, big) as f64,
            (SampleKind::FloatingPoint, 4) => |b, big| f64::from(sample!(f32, b, big)),
            (SampleKind::FloatingPoint, 8) => |b, big| sample!(f64, b, big),
            (kind, size) => return Err(SignalDecodeError::Unsupported { kind, size }),
        };
        Ok(decoder)
    }
}

impl Default for SignalDataType {
    fn default() -> Self {
        Self::calibrated()
    }
}

impl fmt::Display for SignalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endian = if self.big_endian { '>' } else { '<' };
        write!(f, "{endian}{}{}", self.kind, self.size)
    }
}

/// Data types the device uses for raw signal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypes {
    /// Encoding of calibrated signal (picoamps)
    pub calibrated_signal: SignalDataType,
    /// Encoding of uncalibrated signal (ADC counts)
    pub uncalibrated_signal: SignalDataType,
}

impl DataTypes {
    /// Data types reported by current devices
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            calibrated_signal: SignalDataType::calibrated(),
            uncalibrated_signal: SignalDataType::uncalibrated(),
        }
    }
}

// ============================================================================
// Classification Map
// ============================================================================

/// Mapping between classification codes and class names
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationMap {
    classes: BTreeMap<i32, String>,
}

impl Default for ClassificationMap {
    fn default() -> Self {
        Self::from_pairs(PREDEFINED_CLASSES.iter().map(|(code, name)| (*code, *name)))
    }
}

impl ClassificationMap {
    /// Build a map from `(code, name)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        Self {
            classes: pairs
                .into_iter()
                .map(|(code, name)| (code, name.into()))
                .collect(),
        }
    }

    /// Name for a code
    #[must_use]
    pub fn name(&self, code: i32) -> Option<&str> {
        self.classes.get(&code).map(String::as_str)
    }

    /// Codes whose names appear in `names`
    pub fn codes_for<'a, I>(&self, names: I) -> BTreeSet<i32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        self.classes
            .iter()
            .filter(|(_, name)| wanted.contains(name.as_str()))
            .map(|(code, _)| *code)
            .collect()
    }

    /// Number of known classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
