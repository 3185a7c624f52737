//! Notification frame decoding.
//!
//! A response frame is a fixed-length sequence of big-endian 16-bit fields
//! at fixed offsets. Each field is divided by its scale and optionally rounded.
//!
//! # Vson response frame (18 bytes)
//!
//! | bytes | field | scale | unit | rounding |
//! |---|---|---|---|---|
//! | 6-7 | temperature | 10 | °C | 2 decimals |
//! | 10-11 | TVOC | 1000 | mg/m³ | 2 decimals |
//! | 12-13 | HCHO | 1000 | mg/m³ | 2 decimals |
//! | 16-17 | CO2 | 1 | ppm | integer |
//!
//! The remaining bytes (opcode echo, clock) are not decoded.

use bytes::Buf;

use crate::error::{ParseError, ParseResult};
use crate::types::{Measurement, MeasurementKind, MeasurementValue, Unit};

/// Length of a Vson response frame.
pub const FRAME_LEN: usize = 18;

/// One big-endian u16 field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Semantic kind of the field.
    pub kind: MeasurementKind,
    /// Unit of the scaled value.
    pub unit: Unit,
    /// Byte offset of the high byte.
    pub offset: usize,
    /// Divisor applied to the raw value.
    pub scale: u32,
    /// Decimal digits kept after scaling. `None` keeps the raw integer.
    pub decimals: Option<u32>,
}

impl FieldSpec {
    /// Scale a raw field value.
    ///
    /// The quotient `raw / scale` is computed as an `f64` and rounded to
    /// `decimals` digits on its exact binary value, ties to even. A raw HCHO
    /// value of 15 is stored as 0.01499... and rounds to 0.01.
    ///
    /// # Examples
    ///
    /// ```
    /// use vson_types::frame::VSON_FRAME;
    /// use vson_types::MeasurementValue;
    ///
    /// let temperature = &VSON_FRAME.fields[0];
    /// assert_eq!(temperature.scale_raw(265), MeasurementValue::Float(26.5));
    /// ```
    #[must_use]
    pub fn scale_raw(&self, raw: u16) -> MeasurementValue {
        let scale = self.scale.max(1);
        let quotient = f64::from(raw) / f64::from(scale);
        match self.decimals {
            None if scale == 1 => MeasurementValue::Integer(i64::from(raw)),
            None => MeasurementValue::Float(quotient),
            Some(decimals) => MeasurementValue::Float(round_to(quotient, decimals)),
        }
    }
}

/// Round a non-negative finite `value` to `decimals` digits.
///
/// Works on the exact dyadic expansion `mantissa * 2^exponent`, so the
/// result is the nearest multiple of `10^-decimals` to the stored value.
fn round_to(value: f64, decimals: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased - 1075)
    };
    if exponent >= 0 {
        return value;
    }

    let precision = 10u128.pow(decimals);
    let scaled = u128::from(mantissa) * precision;
    let shift = exponent.unsigned_abs();
    if shift >= 128 {
        return 0.0;
    }
    let mut quotient = scaled >> shift;
    let remainder = scaled & ((1u128 << shift) - 1);
    let half = 1u128 << (shift - 1);
    if remainder > half || (remainder == half && quotient % 2 == 1) {
        quotient += 1;
    }
    quotient as f64 / precision as f64
}

/// Layout of a fixed-length frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Exact frame length.
    pub length: usize,
    /// Decoded fields, in output order.
    pub fields: &'static [FieldSpec],
}

/// Layout of the Vson 18-byte response frame.
pub const VSON_FRAME: FrameLayout = FrameLayout {
    length: FRAME_LEN,
    fields: &[
        FieldSpec {
            kind: MeasurementKind::Temperature,
            unit: Unit::Celsius,
            offset: 6,
            scale: 10,
            decimals: Some(2),
        },
        FieldSpec {
            kind: MeasurementKind::Tvoc,
            unit: Unit::MilligramsPerCubicMeter,
            offset: 10,
            scale: 1000,
            decimals: Some(2),
        },
        FieldSpec {
            kind: MeasurementKind::Formaldehyde,
            unit: Unit::MilligramsPerCubicMeter,
            offset: 12,
            scale: 1000,
            decimals: Some(2),
        },
        FieldSpec {
            kind: MeasurementKind::Co2,
            unit: Unit::PartsPerMillion,
            offset: 16,
            scale: 1,
            decimals: None,
        },
    ],
};

impl FrameLayout {
    /// Decode a frame into measurements.
    ///
    /// Frames whose length differs from the layout length are rejected.
    pub fn decode(&self, data: &[u8]) -> ParseResult<Vec<Measurement>> {
        if data.len() != self.length {
            return Err(ParseError::InsufficientBytes {
                expected: self.length,
                actual: data.len(),
            });
        }

        self.fields
            .iter()
            .map(|field| {
                let mut buf = data.get(field.offset..field.offset + 2).ok_or_else(|| {
                    ParseError::InvalidValue(format!(
                        "field {} at offset {} outside frame",
                        field.kind, field.offset
                    ))
                })?;
                let raw = buf.get_u16();
                Ok(Measurement::new(field.kind, field.scale_raw(raw), field.unit))
            })
            .collect()
    }
}

/// Decode a Vson response frame.
///
/// # Examples
///
/// ```
/// use vson_types::frame::decode_frame;
/// use vson_types::{MeasurementKind, MeasurementValue};
///
/// let frame = [
///     0x0a, 0x00, 0x01, 0x01, 0x0e, 0x02, 0x01, 0x09, 0x08,
///     0x00, 0x00, 0x65, 0x00, 0x0f, 0x01, 0x00, 0x02, 0x51,
/// ];
/// let measurements = decode_frame(&frame).unwrap();
/// assert_eq!(measurements[0].kind(), MeasurementKind::Temperature);
/// assert_eq!(measurements[0].value(), MeasurementValue::Float(26.5));
/// assert_eq!(measurements[3].value(), MeasurementValue::Integer(593));
///
/// assert!(decode_frame(&frame[..10]).is_err());
/// ```
pub fn decode_frame(data: &[u8]) -> ParseResult<Vec<Measurement>> {
    VSON_FRAME.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Response captured from a device, 26.5 °C, 593 ppm.
    const CAPTURED: [u8; 18] = [
        0x0a, 0x00, 0x01, 0x01, 0x0e, 0x02, 0x01, 0x09, 0x08, 0x00, 0x00, 0x65, 0x00, 0x0f, 0x01,
        0x00, 0x02, 0x51,
    ];

    fn value_of(measurements: &[Measurement], kind: MeasurementKind) -> MeasurementValue {
        measurements
            .iter()
            .find(|m| m.kind() == kind)
            .map(|m| m.value())
            .unwrap()
    }

    #[test]
    fn test_decode_captured_frame() {
        let m = decode_frame(&CAPTURED).unwrap();
        assert_eq!(m.len(), 4);

        // 0x0109 = 265
        assert_eq!(
            value_of(&m, MeasurementKind::Temperature),
            MeasurementValue::Float(26.5)
        );
        // 0x0065 = 101 -> 0.101
        assert_eq!(
            value_of(&m, MeasurementKind::Tvoc),
            MeasurementValue::Float(0.1)
        );
        // 0x000f = 15 -> 0.015, stored just below the tie
        assert_eq!(
            value_of(&m, MeasurementKind::Formaldehyde),
            MeasurementValue::Float(0.01)
        );
        // 0x0251 = 593
        assert_eq!(
            value_of(&m, MeasurementKind::Co2),
            MeasurementValue::Integer(593)
        );
    }

    #[test]
    fn test_decode_units() {
        let m = decode_frame(&CAPTURED).unwrap();
        assert_eq!(m[0].unit(), Unit::Celsius);
        assert_eq!(m[1].unit(), Unit::MilligramsPerCubicMeter);
        assert_eq!(m[2].unit(), Unit::MilligramsPerCubicMeter);
        assert_eq!(m[3].unit(), Unit::PartsPerMillion);
    }

    #[test]
    fn test_decode_big_endian() {
        let mut frame = [0u8; FRAME_LEN];
        frame[16] = 0x01;
        frame[17] = 0x00;
        let m = decode_frame(&frame).unwrap();
        assert_eq!(
            value_of(&m, MeasurementKind::Co2),
            MeasurementValue::Integer(256)
        );
    }

    #[test]
    fn test_decode_wrong_length() {
        let err = decode_frame(&CAPTURED[..10]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 18,
                actual: 10
            }
        );

        let mut long = CAPTURED.to_vec();
        long.push(0);
        assert!(decode_frame(&long).is_err());
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn test_rounding_on_binary_value() {
        let tvoc = &VSON_FRAME.fields[1];
        // 0.005 and 1.235 are stored just above the tie
        assert_eq!(tvoc.scale_raw(5), MeasurementValue::Float(0.01));
        assert_eq!(tvoc.scale_raw(1235), MeasurementValue::Float(1.24));
        // 0.015 is stored just below it
        assert_eq!(tvoc.scale_raw(15), MeasurementValue::Float(0.01));
        assert_eq!(tvoc.scale_raw(4), MeasurementValue::Float(0.0));
        assert_eq!(tvoc.scale_raw(1234), MeasurementValue::Float(1.23));
    }

    #[test]
    fn test_exact_ties_round_to_even() {
        let hcho = &VSON_FRAME.fields[2];
        assert_eq!(hcho.scale_raw(125), MeasurementValue::Float(0.12));
        assert_eq!(hcho.scale_raw(375), MeasurementValue::Float(0.38));
        assert_eq!(hcho.scale_raw(2500), MeasurementValue::Float(2.5));
    }

    #[test]
    fn test_temperature_extremes() {
        let temperature = &VSON_FRAME.fields[0];
        assert_eq!(temperature.scale_raw(0), MeasurementValue::Float(0.0));
        assert_eq!(
            temperature.scale_raw(u16::MAX),
            MeasurementValue::Float(6553.5)
        );
    }

    #[test]
    fn test_layout_fields_fit_frame() {
        for field in VSON_FRAME.fields {
            assert!(field.offset + 2 <= VSON_FRAME.length);
        }
    }
}
