//! Payload codec: fixed-point coordinates packed as `lat | lon | restricted`.
//!
//! A coordinate is shifted by [`COORD_OFFSET`], scaled by [`COORD_SCALE`] and rounded, so
//! decoding is exact only to the quantization step `1 / COORD_SCALE`.

use serde::{Deserialize, Serialize};

use crate::bits::BitString;
use crate::error::VerificationFailure;
use crate::geofence::GeoPoint;

pub const COORD_OFFSET: f64 = 180.0;
pub const COORD_SCALE: f64 = 1e5;

/// Default width of each coordinate field.
pub const DEFAULT_FIELD_WIDTH: u32 = 32;

const MAX_FIELD_WIDTH: u32 = 63;

/// Encode one coordinate as an unsigned fixed-point field of `bit_width` bits.
pub fn encode_coordinate(value: f64, bit_width: u32) -> Result<BitString, EncodeError> {
    if bit_width == 0 || bit_width > MAX_FIELD_WIDTH {
        return Err(EncodeError::InvalidWidth(bit_width));
    }
    let scaled = ((value + COORD_OFFSET) * COORD_SCALE).round();
    // 2^w is exact in f64; 2^w - 1 is not once w > 53.
    let limit = 2f64.powi(bit_width as i32);
    if !scaled.is_finite() || scaled < 0.0 || scaled >= limit {
        return Err(EncodeError::Overflow { value, bit_width });
    }
    let n = scaled as u64;
    if n >> bit_width != 0 {
        return Err(EncodeError::Overflow { value, bit_width });
    }
    Ok(BitString::from_unsigned(n, bit_width))
}

/// Reverse the offset/scale transform of [`encode_coordinate`].
pub fn decode_coordinate(bits: &BitString) -> Result<f64, VerificationFailure> {
    if bits.is_empty() || bits.len() > MAX_FIELD_WIDTH as usize {
        return Err(VerificationFailure::WidthMismatch {
            expected: MAX_FIELD_WIDTH as usize,
            got: bits.len(),
        });
    }
    let n = bits.to_unsigned().unwrap_or_default();
    Ok(n as f64 / COORD_SCALE - COORD_OFFSET)
}

/// Concatenate the fields in wire order.
pub fn combine(lat_bits: &BitString, lon_bits: &BitString, restricted: bool) -> BitString {
    let mut out = BitString::new();
    out.extend_from(lat_bits);
    out.extend_from(lon_bits);
    out.push(restricted);
    out
}

/// Field widths shared by the encode and decode paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLayout {
    pub field_width: u32,
}

impl Default for PayloadLayout {
    fn default() -> Self {
        Self {
            field_width: DEFAULT_FIELD_WIDTH,
        }
    }
}

impl PayloadLayout {
    pub fn new(field_width: u32) -> Result<Self, EncodeError> {
        if field_width == 0 || field_width > MAX_FIELD_WIDTH {
            return Err(EncodeError::InvalidWidth(field_width));
        }
        Ok(Self { field_width })
    }

    /// Total payload width: two coordinate fields plus the flag bit.
    pub fn total_width(&self) -> usize {
        2 * self.field_width as usize + 1
    }

    pub fn encode(&self, point: &GeoPoint, restricted: bool) -> Result<BinaryPayload, EncodeError> {
        let lat = encode_coordinate(point.latitude, self.field_width)?;
        let lon = encode_coordinate(point.longitude, self.field_width)?;
        Ok(BinaryPayload {
            bits: combine(&lat, &lon, restricted),
            layout: *self,
        })
    }

    /// Wrap received bits as a payload of this layout. Rejects any other width.
    pub fn payload(&self, bits: BitString) -> Result<BinaryPayload, VerificationFailure> {
        if bits.len() != self.total_width() {
            return Err(VerificationFailure::WidthMismatch {
                expected: self.total_width(),
                got: bits.len(),
            });
        }
        Ok(BinaryPayload {
            bits,
            layout: *self,
        })
    }

    /// Quantization-exact reconstruction. Fails if either coordinate leaves its valid range.
    pub fn decode(&self, payload: &BinaryPayload) -> Result<DecodedPayload, VerificationFailure> {
        if payload.layout != *self || payload.bits.len() != self.total_width() {
            return Err(VerificationFailure::WidthMismatch {
                expected: self.total_width(),
                got: payload.bits.len(),
            });
        }
        let w = self.field_width as usize;
        let latitude = decode_coordinate(&payload.bits.slice(0, w))?;
        let longitude = decode_coordinate(&payload.bits.slice(w, 2 * w))?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(VerificationFailure::OutOfRange {
                field: "latitude",
                value: latitude,
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(VerificationFailure::OutOfRange {
                field: "longitude",
                value: longitude,
            });
        }
        Ok(DecodedPayload {
            point: GeoPoint::new(latitude, longitude),
            restricted: payload.restricted_flag(),
        })
    }
}

/// Fixed-width `lat | lon | restricted` bit string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    bits: BitString,
    layout: PayloadLayout,
}

impl BinaryPayload {
    pub fn bits(&self) -> &BitString {
        &self.bits
    }

    pub fn layout(&self) -> PayloadLayout {
        self.layout
    }

    pub fn latitude_bits(&self) -> BitString {
        let w = self.layout.field_width as usize;
        self.bits.slice(0, w)
    }

    pub fn longitude_bits(&self) -> BitString {
        let w = self.layout.field_width as usize;
        self.bits.slice(w, 2 * w)
    }

    /// Trailing flag bit.
    pub fn restricted_flag(&self) -> bool {
        self.bits.last().unwrap_or(false)
    }
}

/// Coordinates and flag recovered from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodedPayload {
    pub point: GeoPoint,
    pub restricted: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("{value} does not fit a {bit_width}-bit field")]
    Overflow { value: f64, bit_width: u32 },
    #[error("field width {0} not in 1..=63")]
    InvalidWidth(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn encode_known_value() {
        // (0 + 180) * 1e5 = 18_000_000
        let bits = encode_coordinate(0.0, 32).unwrap();
        assert_eq!(bits.len(), 32);
        assert_eq!(bits.to_unsigned(), Some(18_000_000));
        assert_eq!(bits.to_string(), format!("{:032b}", 18_000_000u64));
    }

    #[test]
    fn round_trip_within_quantization_step() {
        let mut rng = rand::thread_rng();
        let layout = PayloadLayout::default();
        for _ in 0..2000 {
            let lat = rng.gen_range(-90.0..=90.0);
            let lon = rng.gen_range(-180.0..=180.0);
            let restricted = rng.gen_bool(0.5);
            let payload = layout.encode(&GeoPoint::new(lat, lon), restricted).unwrap();
            assert_eq!(payload.bits().len(), layout.total_width());
            let decoded = layout.decode(&payload).unwrap();
            assert!((decoded.point.latitude - lat).abs() <= 1.0 / COORD_SCALE);
            assert!((decoded.point.longitude - lon).abs() <= 1.0 / COORD_SCALE);
            assert_eq!(decoded.restricted, restricted);
        }
    }

    #[test]
    fn range_endpoints_round_trip() {
        let layout = PayloadLayout::default();
        for (lat, lon) in [(-90.0, -180.0), (90.0, 180.0), (0.0, 0.0)] {
            let payload = layout.encode(&GeoPoint::new(lat, lon), false).unwrap();
            let decoded = layout.decode(&payload).unwrap();
            assert!((decoded.point.latitude - lat).abs() <= 1.0 / COORD_SCALE);
            assert!((decoded.point.longitude - lon).abs() <= 1.0 / COORD_SCALE);
        }
    }

    #[test]
    fn overflow_is_an_error() {
        // (42770 + 180) * 1e5 > 2^32 - 1
        assert_eq!(
            encode_coordinate(42_770.0, 32),
            Err(EncodeError::Overflow {
                value: 42_770.0,
                bit_width: 32
            })
        );
        // 360 * 1e5 needs 26 bits
        assert!(encode_coordinate(180.0, 25).is_err());
        assert!(encode_coordinate(180.0, 26).is_ok());
        assert!(encode_coordinate(-181.0, 32).is_err());
        assert!(encode_coordinate(f64::NAN, 32).is_err());
        assert!(encode_coordinate(f64::INFINITY, 32).is_err());
    }

    #[test]
    fn widest_field_rejects_values_at_its_limit() {
        let at_limit = 92_233_720_368_547.76 - COORD_OFFSET;
        assert_eq!(((at_limit + COORD_OFFSET) * COORD_SCALE).round(), 2f64.powi(63));
        assert!(matches!(
            encode_coordinate(at_limit, 63),
            Err(EncodeError::Overflow { bit_width: 63, .. })
        ));
        let below = 2f64.powi(62) / COORD_SCALE - COORD_OFFSET;
        let bits = encode_coordinate(below, 63).unwrap();
        assert_eq!(bits.len(), 63);
        let n = bits.to_unsigned().unwrap();
        assert!(n > 1 << 61 && n < 1 << 63);
        assert!(encode_coordinate(180.0, 63).is_ok());
    }

    #[test]
    fn invalid_width_rejected() {
        assert_eq!(encode_coordinate(0.0, 0), Err(EncodeError::InvalidWidth(0)));
        assert_eq!(encode_coordinate(0.0, 64), Err(EncodeError::InvalidWidth(64)));
        assert!(PayloadLayout::new(0).is_err());
    }

    #[test]
    fn combine_order_is_lat_lon_flag() {
        let lat: BitString = "01".parse().unwrap();
        let lon: BitString = "10".parse().unwrap();
        assert_eq!(combine(&lat, &lon, true).to_string(), "01101");
    }

    #[test]
    fn decode_rejects_wrong_width() {
        let layout = PayloadLayout::default();
        let bits: BitString = "0101".parse().unwrap();
        assert!(matches!(
            layout.payload(bits),
            Err(VerificationFailure::WidthMismatch { expected: 65, got: 4 })
        ));
    }

    #[test]
    fn decode_rejects_out_of_range_latitude() {
        let layout = PayloadLayout::default();
        // latitude field of all ones decodes far beyond 90 degrees
        let mut bits = BitString::from_unsigned(u32::MAX as u64, 32);
        bits.extend_from(&encode_coordinate(10.0, 32).unwrap());
        bits.push(false);
        let payload = layout.payload(bits).unwrap();
        assert!(matches!(
            layout.decode(&payload),
            Err(VerificationFailure::OutOfRange { field: "latitude", .. })
        ));
    }

    #[test]
    fn payload_field_accessors() {
        let layout = PayloadLayout::new(26).unwrap();
        let payload = layout.encode(&GeoPoint::new(34.0, 74.0), true).unwrap();
        assert_eq!(payload.latitude_bits(), encode_coordinate(34.0, 26).unwrap());
        assert_eq!(payload.longitude_bits(), encode_coordinate(74.0, 26).unwrap());
        assert!(payload.restricted_flag());
    }
}
