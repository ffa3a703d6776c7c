//! Viewer message definitions.
//!
//! Viewers speak JSON text over WebSocket. The relay only interprets the
//! `type` discriminator; the single actionable shape is `transform_update`.
//! Scene documents travelling the other way are opaque text and have no
//! type here.

use serde::{Deserialize, Serialize};

/// A rotation as sent by viewers: XYZ euler angles or an XYZW quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rotation {
    /// Euler angles in radians, `[x, y, z]`.
    Euler([f64; 3]),
    /// Quaternion, `[x, y, z, w]`.
    Quaternion([f64; 4]),
}

/// One transform edit for a named scene entity.
///
/// Field names match the wire format verbatim; the payload is forwarded to
/// the peer without semantic interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformEdit {
    /// Entity the edit applies to; the coalescing key.
    #[serde(rename = "objectName")]
    pub object_name: String,
    /// Position `[x, y, z]`.
    pub position: [f64; 3],
    /// Rotation, euler or quaternion.
    pub rotation: Rotation,
    /// Scale `[x, y, z]`.
    pub scale: [f64; 3],
    /// Viewer-supplied timestamp in milliseconds.
    pub timestamp: f64,
}

/// Inbound viewer messages the relay acts on.
///
/// Any JSON whose `type` is not listed here fails to parse and is ignored
/// by the caller (logged, not an error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewerMessage {
    /// A transform edit destined for the authoritative peer.
    #[serde(rename = "transform_update")]
    TransformUpdate(TransformEdit),
}

impl ViewerMessage {
    /// Parses a viewer text message.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error for malformed JSON or unknown
    /// `type` values; callers treat both as ignorable.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_edit() -> TransformEdit {
        TransformEdit {
            object_name: "Cube".to_string(),
            position: [1.0, 2.0, 3.0],
            rotation: Rotation::Euler([0.0, 0.5, 0.0]),
            scale: [1.0, 1.0, 1.0],
            timestamp: 1_700_000_000_000.0,
        }
    }

    #[test]
    fn parse_transform_update() {
        let text = r#"{
            "type": "transform_update",
            "objectName": "Cube",
            "position": [1.0, 2.0, 3.0],
            "rotation": [0.0, 0.5, 0.0],
            "scale": [1.0, 1.0, 1.0],
            "timestamp": 1700000000000.0
        }"#;
        let msg = ViewerMessage::parse(text).unwrap();
        assert_eq!(msg, ViewerMessage::TransformUpdate(sample_edit()));
    }

    #[test]
    fn parse_quaternion_rotation() {
        let text = r#"{
            "type": "transform_update",
            "objectName": "Suzanne",
            "position": [0.0, 0.0, 0.0],
            "rotation": [0.0, 0.0, 0.0, 1.0],
            "scale": [2.0, 2.0, 2.0],
            "timestamp": 1.0
        }"#;
        let ViewerMessage::TransformUpdate(edit) = ViewerMessage::parse(text).unwrap();
        assert_eq!(edit.rotation, Rotation::Quaternion([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(ViewerMessage::parse(r#"{"type": "chat", "text": "hi"}"#).is_err());
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(ViewerMessage::parse(r#"{"objectName": "Cube"}"#).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(ViewerMessage::parse("not json").is_err());
    }

    #[test]
    fn two_element_rotation_is_rejected() {
        let text = r#"{
            "type": "transform_update",
            "objectName": "Cube",
            "position": [0.0, 0.0, 0.0],
            "rotation": [0.0, 0.0],
            "scale": [1.0, 1.0, 1.0],
            "timestamp": 1.0
        }"#;
        assert!(ViewerMessage::parse(text).is_err());
    }

    #[test]
    fn serialization_carries_wire_field_names() {
        let json =
            serde_json::to_value(ViewerMessage::TransformUpdate(sample_edit())).unwrap();
        assert_eq!(json["type"], "transform_update");
        assert_eq!(json["objectName"], "Cube");
        assert_eq!(json["position"][2], 3.0);
        // Euler rotation stays a bare 3-array.
        assert_eq!(json["rotation"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn round_trip_preserves_edit() {
        let msg = ViewerMessage::TransformUpdate(sample_edit());
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(ViewerMessage::parse(&text).unwrap(), msg);
    }
}
