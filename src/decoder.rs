//! Raw ADC byte pairs to volts.
//!
//! The device ships each reading as two bytes, low byte first. The resulting
//! code is mapped linearly onto the 3.3 V reference with a 12-bit full scale.
//! The code is not masked or clamped, so a corrupted high byte produces a value
//! above the reference rather than an error.

/// Bytes that make up one sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Code corresponding to the reference voltage.
pub const ADC_FULL_SCALE: f64 = 4095.0;

/// ADC reference voltage in volts.
pub const REFERENCE_VOLTS: f64 = 3.3;

/// Assemble the little-endian code at `offset`, if a full pair remains.
#[inline]
pub fn code_at(bytes: &[u8], offset: usize) -> Option<u16> {
    let pair = bytes.get(offset..offset.checked_add(BYTES_PER_SAMPLE)?)?;
    Some(u16::from(pair[0]) | (u16::from(pair[1]) << 8))
}

/// Scale an ADC code to volts.
#[inline]
pub fn code_to_volts(code: u16) -> f64 {
    (f64::from(code) / ADC_FULL_SCALE) * REFERENCE_VOLTS
}

/// Recover the nearest ADC code for a decoded voltage.
pub fn volts_to_code(volts: f64) -> u16 {
    (volts / REFERENCE_VOLTS * ADC_FULL_SCALE).round() as u16
}

/// Decode the sample starting at `offset`.
///
/// Returns `None` when fewer than two bytes remain, which is how a trailing odd
/// byte is dropped.
#[inline]
pub fn decode_at(bytes: &[u8], offset: usize) -> Option<f64> {
    code_at(bytes, offset).map(code_to_volts)
}

/// Number of whole samples contained in `len` bytes.
#[inline]
pub fn sample_count(len: usize) -> usize {
    len / BYTES_PER_SAMPLE
}

/// Iterate over every whole sample in `bytes`, in buffer order.
pub fn samples(bytes: &[u8]) -> impl Iterator<Item = f64> + '_ {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| code_to_volts(u16::from_le_bytes([pair[0], pair[1]])))
}

/// Decode a whole region into a vector of volts.
pub fn decode_all(bytes: &[u8]) -> Vec<f64> {
    let mut out = Vec::with_capacity(sample_count(bytes.len()));
    out.extend(samples(bytes));
    out
}
