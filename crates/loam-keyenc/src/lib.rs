//! Order-preserving index-key encoding with reusable per-worker buffers.
//!
//! One document write can touch many secondary indexes; allocating one
//! key/prefix buffer per index per write is the allocation hot spot this
//! crate removes. Each worker owns one [`EncodingPool`] and reuses its
//! scratch encoder and prefixed-key buffer for the lifetime of its call
//! chain. The pool is passed explicitly by `&mut` — buffer ownership and
//! lifetime are visible in signatures, never hidden in thread-local state.
//!
//! The encoding guarantees that lexicographic byte order over encoded keys
//! equals the canonical [`IndexKey`] order, so index cursors can compare raw
//! bytes without decoding.

use loam_types::{EncodingVersion, IndexKey, Value};

// ---------------------------------------------------------------------------
// Ordered scalar transforms
// ---------------------------------------------------------------------------

/// Sign-bias an `i64` so unsigned big-endian byte order matches signed order.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn ordered_i64_bytes(value: i64) -> [u8; 8] {
    let biased = (value as u64) ^ (1u64 << 63);
    biased.to_be_bytes()
}

/// IEEE total-order transform for `f64`: flip the sign bit on non-negatives,
/// flip every bit on negatives.
#[must_use]
pub const fn ordered_f64_bytes(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits & 0x8000_0000_0000_0000 == 0 {
        bits ^ 0x8000_0000_0000_0000
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

/// Append bytes with `0x00` escaped as `0x00 0xFF`, terminated by `0x00 0x00`,
/// so variable-length strings keep unambiguous tuple boundaries.
fn push_terminated_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        if byte == 0 {
            out.extend_from_slice(&[0, 0xFF]);
        } else {
            out.push(byte);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

/// Continuation byte before each element of a variable-length aggregate.
const AGG_MORE: u8 = 1;
/// Terminator after the last element; orders a prefix before its extension.
const AGG_END: u8 = 0;

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    out.push(value.type_rank());
    match value {
        Value::Null => {}
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::Int(v) => out.extend_from_slice(&ordered_i64_bytes(*v)),
        Value::Double(v) => out.extend_from_slice(&ordered_f64_bytes(*v)),
        Value::String(v) => push_terminated_bytes(out, v.as_bytes()),
        Value::Array(items) => {
            for item in items {
                out.push(AGG_MORE);
                encode_value(out, item);
            }
            out.push(AGG_END);
        }
        Value::Document(doc) => {
            for (name, item) in doc {
                out.push(AGG_MORE);
                push_terminated_bytes(out, name.as_bytes());
                encode_value(out, item);
            }
            out.push(AGG_END);
        }
    }
}

// ---------------------------------------------------------------------------
// KeyEncoder
// ---------------------------------------------------------------------------

/// Reusable scratch encoder producing the on-disk bytes of one index key.
///
/// Contents are only meaningful between a [`KeyEncoder::reset_to_key`] call
/// and the next reset on the same encoder.
#[derive(Debug)]
pub struct KeyEncoder {
    version: EncodingVersion,
    buf: Vec<u8>,
}

impl KeyEncoder {
    /// Create an encoder for one encoding version.
    #[must_use]
    pub fn new(version: EncodingVersion) -> Self {
        Self {
            version,
            buf: Vec::with_capacity(256),
        }
    }

    /// Version this encoder emits.
    #[must_use]
    pub const fn version(&self) -> EncodingVersion {
        self.version
    }

    /// Clear the scratch and encode `key` into it.
    pub fn reset_to_key(&mut self, key: &IndexKey) {
        self.buf.clear();
        self.buf.push(self.version.discriminant());
        for value in key.values() {
            encode_value(&mut self.buf, value);
        }
    }

    /// Encoded bytes of the last reset key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Length of the encoded bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been encoded since construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ---------------------------------------------------------------------------
// build_prefixed_key
// ---------------------------------------------------------------------------

/// Clear `out` and fill it with `prefix` followed by `encoded_key`, reserving
/// capacity first so the append never reallocates mid-way.
pub fn build_prefixed_key(prefix: &[u8], encoded_key: &[u8], out: &mut Vec<u8>) {
    out.clear();
    let total = prefix.len() + encoded_key.len();
    if out.capacity() < total {
        out.reserve(total);
    }
    out.extend_from_slice(prefix);
    out.extend_from_slice(encoded_key);
}

// ---------------------------------------------------------------------------
// EncodingPool
// ---------------------------------------------------------------------------

/// Per-worker reusable encoding buffers.
///
/// Holds one cached [`KeyEncoder`] (recreated only on a version mismatch),
/// one prefixed-key buffer, and one value buffer. Never share a pool across
/// threads and never retain a returned buffer reference across two calls —
/// the borrow checker enforces both.
#[derive(Debug)]
pub struct EncodingPool {
    encoder: Option<KeyEncoder>,
    prefixed: Vec<u8>,
    value: Vec<u8>,
}

impl EncodingPool {
    /// Create a pool with small pre-sized buffers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: None,
            prefixed: Vec::with_capacity(256),
            value: Vec::with_capacity(64),
        }
    }

    /// The cached encoder for `version`, recreated only when the cached one
    /// was built for a different version. The caller must reset it before
    /// reading.
    pub fn encoder(&mut self, version: EncodingVersion) -> &mut KeyEncoder {
        if !matches!(&self.encoder, Some(e) if e.version() == version) {
            self.encoder = Some(KeyEncoder::new(version));
        }
        self.encoder.get_or_insert_with(|| KeyEncoder::new(version))
    }

    /// The cleared prefixed-key buffer; valid only until the next pool call.
    pub fn prefixed_key_buffer(&mut self) -> &mut Vec<u8> {
        self.prefixed.clear();
        &mut self.prefixed
    }

    /// The cleared value buffer; valid only until the next pool call.
    pub fn value_buffer(&mut self) -> &mut Vec<u8> {
        self.value.clear();
        &mut self.value
    }

    /// Pre-reserve both buffers once per document touching many indexes.
    pub fn reserve_capacity(&mut self, prefixed_key_size: usize, value_size: usize) {
        if self.prefixed.capacity() < prefixed_key_size {
            self.prefixed.reserve(prefixed_key_size);
        }
        if self.value.capacity() < value_size {
            self.value.reserve(value_size);
        }
    }

    /// Encode `key` under `version` and lay `prefix` + encoded bytes into the
    /// pooled buffer, returning the full on-disk key bytes.
    pub fn encode_prefixed(
        &mut self,
        prefix: &[u8],
        version: EncodingVersion,
        key: &IndexKey,
    ) -> &[u8] {
        if !matches!(&self.encoder, Some(e) if e.version() == version) {
            self.encoder = Some(KeyEncoder::new(version));
        }
        let encoder = self.encoder.get_or_insert_with(|| KeyEncoder::new(version));
        encoder.reset_to_key(key);
        build_prefixed_key(prefix, encoder.as_bytes(), &mut self.prefixed);
        &self.prefixed
    }
}

impl Default for EncodingPool {
    fn default() -> Self {
        Self::new()
    }
}
