//! Locating `ST … EN` delimited frames in raw serial text.
//!
//! The receiver forwards radio datagrams verbatim, so a read can contain
//! echoed poll commands, stale bytes from another node, or only half of a
//! frame. Only complete frames are extracted; anything outside the first
//! complete frame is dropped with the read that carried it. A fragment left
//! at the end of one read is not carried into the next, because on a shared
//! line it cannot be attributed to a particular node.

use std::fmt;

use crate::scan::DeviceId;

/// Start-of-frame marker
pub const START_MARKER: &str = "ST";

/// End-of-frame marker
pub const END_MARKER: &str = "EN";

/// Field value used for undefined readings in a blank scan
pub const UNDEFINED_FIELD: &str = "nan";

/// One complete frame, markers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Placeholder frame for a poll that produced nothing decodable.
    ///
    /// All reading fields are undefined, so it still carries five fields and
    /// decodes to a blank sample owned by `device`.
    pub fn blank(device: DeviceId) -> Self {
        Frame(format!(
            "{START_MARKER},{id},{nan},{nan},{nan},{nan},{END_MARKER}",
            id = device.0,
            nan = UNDEFINED_FIELD
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text between the markers.
    pub fn body(&self) -> &str {
        &self.0[START_MARKER.len()..self.0.len() - END_MARKER.len()]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the first complete frame from `buffer`.
///
/// Returns `None` when either marker is missing.
pub fn extract(buffer: &str) -> Option<Frame> {
    let start = buffer.find(START_MARKER)?;
    let body_start = start + START_MARKER.len();
    let end = body_start + buffer[body_start..].find(END_MARKER)? + END_MARKER.len();
    Some(Frame(buffer[start..end].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_clean_frame() {
        let frame = extract("ST,1,30,-240,336,240,EN").unwrap();
        assert_eq!(frame.as_str(), "ST,1,30,-240,336,240,EN");
        assert_eq!(frame.body(), ",1,30,-240,336,240,");
    }

    #[test]
    fn discards_noise_around_frame() {
        let frame = extract("mb_1\n\u{0}xxST,1,31,-1472,208,32,ENST,1,3").unwrap();
        assert_eq!(frame.as_str(), "ST,1,31,-1472,208,32,EN");
    }

    #[test]
    fn takes_first_frame_only() {
        let frame = extract("ST,0,1,2,3,4,ENST,0,2,2,3,4,EN").unwrap();
        assert_eq!(frame.as_str(), "ST,0,1,2,3,4,EN");
    }

    #[test]
    fn end_marker_must_follow_start() {
        // a stray EN before the start marker does not terminate the frame
        assert!(extract("EN,ST,2,5,1,1,1").is_none());
        let frame = extract("EN,ST,2,5,1,1,1,EN").unwrap();
        assert_eq!(frame.as_str(), "ST,2,5,1,1,1,EN");
    }

    #[test]
    fn missing_markers_are_incomplete() {
        assert!(extract("").is_none());
        assert!(extract("mb_0").is_none());
        assert!(extract("ST,1,30,-240,33").is_none());
        assert!(extract(",336,240,EN").is_none());
        // markers must not overlap
        assert!(extract("STEN").is_some());
        assert!(extract("STN").is_none());
    }

    #[test]
    fn blank_frame_shape() {
        let frame = Frame::blank(DeviceId(2));
        assert_eq!(frame.as_str(), "ST,2,nan,nan,nan,nan,EN");
        assert_eq!(extract(frame.as_str()), Some(frame));
    }
}
