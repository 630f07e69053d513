//! Decoding frames into accelerometer samples.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::frame::{Frame, UNDEFINED_FIELD};

// ============================================================================
// Data Types
// ============================================================================

/// Number of the sensor node, as carried in the first frame field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u8);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw accelerometer reading in milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Acceleration {
    /// Euclidean norm, truncated to an integer.
    pub fn magnitude(&self) -> u32 {
        let sum: u64 = [self.x, self.y, self.z]
            .iter()
            .map(|v| u64::from(v.unsigned_abs()).pow(2))
            .sum();
        (sum as f64).sqrt() as u32
    }
}

/// One decoded scan.
///
/// A blank scan (a poll that yielded nothing decodable) has no sequence,
/// acceleration or magnitude, but still belongs to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub device: DeviceId,
    /// Node-side transmit counter. May repeat when a reply is received twice.
    pub sequence: Option<u32>,
    pub acceleration: Option<Acceleration>,
    pub magnitude: Option<u32>,
    /// Host capture time.
    pub captured_at: Instant,
}

impl Sample {
    pub fn new(device: DeviceId, sequence: u32, acceleration: Acceleration) -> Self {
        Self {
            device,
            sequence: Some(sequence),
            acceleration: Some(acceleration),
            magnitude: Some(acceleration.magnitude()),
            captured_at: Instant::now(),
        }
    }

    pub fn blank(device: DeviceId) -> Self {
        Self {
            device,
            sequence: None,
            acceleration: None,
            magnitude: None,
            captured_at: Instant::now(),
        }
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.sequence.is_none()
    }
}

// ============================================================================
// Decoder
// ============================================================================

const FIELD_NAMES: [&str; 5] = ["id", "count", "x_acc", "y_acc", "z_acc"];

/// Decode a complete frame.
///
/// Frame body layout: `,<id>,<count>,<x>,<y>,<z>,` (the comma before `EN`
/// is optional). A body whose reading fields are all `nan` decodes to a
/// blank sample.
pub fn decode(frame: &Frame) -> Result<Sample, DecodeError> {
    let body = frame.body().trim();
    let body = body.strip_prefix(',').unwrap_or(body);
    let body = body.strip_suffix(',').unwrap_or(body);
    let fields: Vec<&str> = body
        .split(',')
        .map(str::trim)
        .collect();

    if fields.len() != FIELD_NAMES.len() {
        return Err(DecodeError::FieldCount {
            expected: FIELD_NAMES.len(),
            found: fields.len(),
        });
    }

    let device = DeviceId(parse_field(0, fields[0])?);

    if fields[1..]
        .iter()
        .all(|f| f.eq_ignore_ascii_case(UNDEFINED_FIELD))
    {
        return Ok(Sample::blank(device));
    }

    let sequence = parse_field(1, fields[1])?;
    let acceleration = Acceleration {
        x: parse_field(2, fields[2])?,
        y: parse_field(3, fields[3])?,
        z: parse_field(4, fields[4])?,
    };
    Ok(Sample::new(device, sequence, acceleration))
}

fn parse_field<T: std::str::FromStr>(index: usize, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::Parse {
        field: FIELD_NAMES[index],
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::extract;

    fn decode_str(s: &str) -> Result<Sample, DecodeError> {
        decode(&extract(s).expect("test input holds a frame"))
    }

    #[test]
    fn decodes_firmware_frame() {
        let sample = decode_str("ST,1,31,-1472,208,32,EN").unwrap();
        assert_eq!(sample.device, DeviceId(1));
        assert_eq!(sample.sequence, Some(31));
        assert_eq!(
            sample.acceleration,
            Some(Acceleration {
                x: -1472,
                y: 208,
                z: 32
            })
        );
        assert_eq!(sample.magnitude, Some(1486));
        assert!(!sample.is_blank());
    }

    #[test]
    fn trailing_comma_is_optional() {
        let sample = decode_str("ST,2,7,1,2,2EN").unwrap();
        assert_eq!(sample.device, DeviceId(2));
        assert_eq!(sample.magnitude, Some(3));
    }

    #[test]
    fn magnitude_matches_recorded_scans() {
        let cases = [
            ((-240, 336, 240), 477),
            ((-1472, 208, 32), 1486),
            ((-752, 192, 224), 807),
            ((-1920, 208, -80), 1932),
            ((-2032, 352, -656), 2164),
            ((0, 0, 0), 0),
            // full-scale axes must not overflow the sum of squares
            ((i32::MIN, i32::MIN, i32::MIN), 3_719_550_786),
            ((i32::MAX, 0, i32::MIN), 3_037_000_499),
        ];
        for ((x, y, z), expected) in cases {
            assert_eq!(Acceleration { x, y, z }.magnitude(), expected, "({x},{y},{z})");
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            decode_str("ST,3,-1472,208,32EN"),
            Err(DecodeError::FieldCount {
                expected: 5,
                found: 4
            })
        );
        assert_eq!(
            decode_str("ST,1,31,-1472,208,32,99,EN"),
            Err(DecodeError::FieldCount {
                expected: 5,
                found: 6
            })
        );
        // only one separating comma is dropped on each side
        assert_eq!(
            decode_str("ST,,,2,7,1,1,1,,,EN"),
            Err(DecodeError::FieldCount {
                expected: 5,
                found: 9
            })
        );
        assert!(matches!(
            decode_str("STEN"),
            Err(DecodeError::FieldCount { found: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_integer_fields() {
        assert_eq!(
            decode_str("ST,1,31,-14x2,208,32,EN"),
            Err(DecodeError::Parse {
                field: "x_acc",
                value: "-14x2".into()
            })
        );
        // sequence counts are unsigned
        assert!(matches!(
            decode_str("ST,1,-3,1,1,1,EN"),
            Err(DecodeError::Parse { field: "count", .. })
        ));
        // partially undefined readings are garbage, not a blank scan
        assert!(matches!(
            decode_str("ST,1,4,nan,1,1,EN"),
            Err(DecodeError::Parse { field: "x_acc", .. })
        ));
    }

    #[test]
    fn decodes_blank_scan() {
        let sample = decode(&Frame::blank(DeviceId(2))).unwrap();
        assert!(sample.is_blank());
        assert_eq!(sample.device, DeviceId(2));
        assert_eq!(sample.acceleration, None);
        assert_eq!(sample.magnitude, None);
    }
}
