use serde::{Deserialize, Serialize};

/// Face region in frame coordinates, edges in `(top, right, bottom, left)` order.
///
/// `right` and `bottom` are exclusive. Edges may lie outside the frame when the
/// detector reports a partially visible face; [`crate::crop::crop_face`] clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
}

/// A registered person: numeric id plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u32,
    pub name: String,
}

/// Classifier output for one face crop. Lower distance = better match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    pub distance: f64,
}

/// Display name reported for faces whose best distance exceeds the threshold.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Display name reported for faces the classifier failed to score.
pub const ERROR_NAME: &str = "Error";

/// Outcome of recognizing one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub identity_id: Option<u32>,
    pub display_name: String,
    /// 0–100, higher is better: `max(0, 100 - distance)`.
    pub confidence: f64,
    pub face_box: Option<FaceBox>,
    pub is_known: bool,
}

impl RecognitionResult {
    /// Convert a classifier distance into a caller-facing result.
    ///
    /// `name_for` resolves the display name of an accepted label.
    pub fn from_prediction(
        prediction: Prediction,
        threshold: f64,
        face_box: FaceBox,
        name_for: impl FnOnce(u32) -> String,
    ) -> Self {
        let confidence = confidence_from_distance(prediction.distance);
        if prediction.distance <= threshold {
            Self {
                identity_id: Some(prediction.label),
                display_name: name_for(prediction.label),
                confidence,
                face_box: Some(face_box),
                is_known: true,
            }
        } else {
            Self {
                identity_id: None,
                display_name: UNKNOWN_NAME.to_string(),
                confidence,
                face_box: Some(face_box),
                is_known: false,
            }
        }
    }

    /// Result for a face whose prediction call failed.
    pub fn failed(face_box: FaceBox) -> Self {
        Self {
            identity_id: None,
            display_name: ERROR_NAME.to_string(),
            confidence: 0.0,
            face_box: Some(face_box),
            is_known: false,
        }
    }
}

/// Invert a "lower is better" distance onto the 0–100 confidence scale.
pub fn confidence_from_distance(distance: f64) -> f64 {
    (100.0 - distance).max(0.0)
}

/// Fallback display name for a labeled identity with no registered name.
pub fn fallback_name(id: u32) -> String {
    format!("User{id}")
}
