//! Payload Decoder
//!
//! Turns an opaque notification payload into a 3-axis sample without
//! knowing the device's layout in advance. Interpretations are tried in a
//! fixed order and the first one producing a non-zero triplet wins:
//!
//! ```text
//! 1. f32 x3 @0          LE, then BE        (>= 12 bytes)
//! 2. i16 x3 @0          LE, then BE        (>= 6 bytes)
//! 3. i16 x3 @len-6      LE, then BE        (>= 6 bytes)
//! 4. i16 x3 @2          LE, then BE        (>= 8 bytes)
//! 5. i8 x3 / 128, then (u8 - 128) x3 / 128 (>= 3 bytes)
//! 6. zero vector
//! ```
//!
//! The order was found by trial against consumer and hobby sensors. It is
//! best effort and will misread some layouts.
//!
//! One deliberate departure from a plain first-match order: a triplet with
//! a NaN or infinite component is treated like a zero triplet, so the next
//! interpretation is tried. Packed int16 data often reads as non-finite
//! floats, and such a sample would poison every downstream magnitude and
//! plot.

use crate::domain::models::AccelSample;

/// Full-scale divisors for ±2g, ±4g, ±8g and ±16g int16 encodings.
pub const INT16_DIVISORS: [f32; 4] = [16384.0, 8192.0, 4096.0, 2048.0];

/// Largest component magnitude accepted after normalization.
pub const MAX_NORMALIZED_G: f32 = 32.0;

#[derive(Debug, Clone, Copy)]
enum Endian {
    Little,
    Big,
}

/// True when every byte is zero; such payloads come from unarmed devices.
pub fn is_noise(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// Decode a payload into a best-effort sample. Never fails.
pub fn decode(bytes: &[u8]) -> AccelSample {
    if bytes.len() < 3 || is_noise(bytes) {
        return AccelSample::ZERO;
    }

    float_triplet(bytes)
        .or_else(|| int16_triplet_at(bytes, 0))
        .or_else(|| {
            bytes
                .len()
                .checked_sub(6)
                .and_then(|offset| int16_triplet_at(bytes, offset))
        })
        .or_else(|| int16_triplet_at(bytes, 2))
        .or_else(|| byte_triplet(bytes))
        .unwrap_or(AccelSample::ZERO)
}

/// A step wins only with a finite, non-zero triplet.
fn accept(sample: AccelSample) -> Option<AccelSample> {
    let finite = sample.x.is_finite() && sample.y.is_finite() && sample.z.is_finite();
    (finite && !sample.is_zero()).then_some(sample)
}

fn float_triplet(bytes: &[u8]) -> Option<AccelSample> {
    if bytes.len() < 12 {
        return None;
    }
    [Endian::Little, Endian::Big].into_iter().find_map(|endian| {
        let read = |i: usize| {
            let word = [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
            match endian {
                Endian::Little => f32::from_le_bytes(word),
                Endian::Big => f32::from_be_bytes(word),
            }
        };
        accept(AccelSample::new(read(0), read(4), read(8)))
    })
}

fn int16_triplet_at(bytes: &[u8], offset: usize) -> Option<AccelSample> {
    let window = bytes.get(offset..offset.checked_add(6)?)?;
    [Endian::Little, Endian::Big].into_iter().find_map(|endian| {
        let read = |i: usize| {
            let word = [window[i], window[i + 1]];
            match endian {
                Endian::Little => i16::from_le_bytes(word),
                Endian::Big => i16::from_be_bytes(word),
            }
        };
        accept(normalize_int16([read(0), read(2), read(4)]))
    })
}

/// Scale raw int16 counts by the first full-scale divisor that keeps every
/// component within ±32 g, defaulting to the ±2g divisor.
pub fn normalize_int16(raw: [i16; 3]) -> AccelSample {
    let scaled = |divisor: f32| {
        AccelSample::new(
            raw[0] as f32 / divisor,
            raw[1] as f32 / divisor,
            raw[2] as f32 / divisor,
        )
    };
    INT16_DIVISORS
        .iter()
        .map(|divisor| scaled(*divisor))
        .find(|s| {
            s.x.abs() <= MAX_NORMALIZED_G
                && s.y.abs() <= MAX_NORMALIZED_G
                && s.z.abs() <= MAX_NORMALIZED_G
        })
        .unwrap_or_else(|| scaled(INT16_DIVISORS[0]))
}

fn byte_triplet(bytes: &[u8]) -> Option<AccelSample> {
    let head = bytes.get(..3)?;
    let signed = AccelSample::new(
        head[0] as i8 as f32 / 128.0,
        head[1] as i8 as f32 / 128.0,
        head[2] as i8 as f32 / 128.0,
    );
    accept(signed).or_else(|| {
        accept(AccelSample::new(
            (head[0] as f32 - 128.0) / 128.0,
            (head[1] as f32 - 128.0) / 128.0,
            (head[2] as f32 - 128.0) / 128.0,
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_payloads_decode_to_zero() {
        assert_eq!(decode(&[]), AccelSample::ZERO);
        assert_eq!(decode(&[0x7F]), AccelSample::ZERO);
        assert_eq!(decode(&[0x10, 0x20]), AccelSample::ZERO);
    }

    #[test]
    fn test_all_zero_payloads_decode_to_zero() {
        for len in [3, 6, 8, 12, 20, 60] {
            let bytes = vec![0u8; len];
            assert!(is_noise(&bytes));
            assert_eq!(decode(&bytes), AccelSample::ZERO, "len {}", len);
        }
    }

    #[test]
    fn test_little_endian_floats() {
        let bytes = [
            0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x40, 0x40,
        ];
        assert_eq!(decode(&bytes), AccelSample::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_big_endian_floats_when_little_endian_reads_zero() {
        // Each word is -0.0 little-endian and a tiny denormal big-endian.
        let bytes = [
            0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x80,
        ];
        let tiny = f32::from_bits(0x0000_0080);
        assert_eq!(decode(&bytes), AccelSample::new(tiny, tiny, tiny));
    }

    #[test]
    fn test_int16_triplet_normalized() {
        let bytes = [0x00, 0x40, 0x00, 0x20, 0x00, 0x10];
        let sample = decode(&bytes);
        assert_eq!(sample, AccelSample::new(1.0, 0.5, 0.25));
        assert!(sample.x.abs() <= 32.0 && sample.y.abs() <= 32.0 && sample.z.abs() <= 32.0);
    }

    #[test]
    fn test_int16_reads_little_endian_first() {
        let bytes = [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode(&bytes), AccelSample::new(192.0 / 16384.0, 0.0, 0.0));
    }

    #[test]
    fn test_leading_int16_triplet_in_longer_payload() {
        let mut bytes = vec![0u8; 10];
        bytes[4..10].copy_from_slice(&[0x00, 0x40, 0x00, 0xC0, 0x00, 0x20]);
        assert_eq!(decode(&bytes), AccelSample::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_trailing_triplet_after_zero_header() {
        // Leading window is all zero; the last six bytes carry the data.
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x40];
        assert_eq!(decode(&bytes), AccelSample::new(0.0, 1.0, 1.0));
    }

    #[test]
    fn test_three_signed_bytes() {
        assert_eq!(
            decode(&[0x40, 0xC0, 0x00]),
            AccelSample::new(0.5, -0.5, 0.0)
        );
    }

    #[test]
    fn test_unsigned_bytes_recentered() {
        assert_eq!(
            decode(&[0x00, 0x00, 0x00, 0x05]),
            AccelSample::new(-1.0, -1.0, -1.0)
        );
    }

    #[test]
    fn test_normalize_uses_first_divisor_in_range() {
        let sample = normalize_int16([i16::MAX, i16::MIN, 0]);
        assert_eq!(sample.x, i16::MAX as f32 / 16384.0);
        assert_eq!(sample.y, -2.0);
        assert_eq!(sample.z, 0.0);
    }

    #[test]
    fn test_non_finite_floats_fall_through_to_int16() {
        let bytes = [0xFF; 12];
        let expected = -1.0 / 16384.0;
        assert_eq!(decode(&bytes), AccelSample::new(expected, expected, expected));
    }
}
