//! Face-position guidance for the overlay warning line.
//!
//! The face extractor publishes a normalized face box as four named
//! scalars; the session checks it against the acceptable placement and
//! picks the translation key of the first problem found.

use std::collections::HashMap;

/// Signal keys under which the extractor publishes the face box. A value
/// below zero means no face was found on that frame.
pub const TOP_KEY: &str = "Top Square";
pub const LEFT_KEY: &str = "Left Square";
pub const RIGHT_KEY: &str = "Right Square";
pub const BOTTOM_KEY: &str = "Bottom Square";

/// Normalized face bounding box, every edge in `[0, 1]` frame fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

impl FaceBox {
    /// Extracts the face box from a keyed signal batch. Returns `None` when
    /// any edge is missing or carries the no-face sentinel.
    pub fn from_signals(values: &HashMap<String, f64>) -> Option<Self> {
        let top = *values.get(TOP_KEY)?;
        let left = *values.get(LEFT_KEY)?;
        let right = *values.get(RIGHT_KEY)?;
        let bottom = *values.get(BOTTOM_KEY)?;
        if top < 0.0 || left < 0.0 || right < 0.0 || bottom < 0.0 {
            return None;
        }
        Some(Self {
            top,
            left,
            right,
            bottom,
        })
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Whether a batch said anything about the face box at all.
pub fn face_reported(values: &HashMap<String, f64>) -> bool {
    values.contains_key(TOP_KEY)
        && values.contains_key(LEFT_KEY)
        && values.contains_key(RIGHT_KEY)
        && values.contains_key(BOTTOM_KEY)
}

/// Acceptable face placement, as fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    pub min_width: f64,
    pub max_width: f64,
    pub min_height: f64,
    pub max_height: f64,
    /// Allowed distance of the face center from the frame center.
    pub center_offset: f64,
}

impl Default for FaceGeometry {
    fn default() -> Self {
        Self {
            min_width: 0.1,
            max_width: 1.0,
            min_height: 0.1,
            max_height: 1.0,
            center_offset: 0.2,
        }
    }
}

impl FaceGeometry {
    /// Translation key of the first placement problem, or `None` when the
    /// face sits acceptably in the frame.
    pub fn check(&self, face: Option<&FaceBox>) -> Option<&'static str> {
        let Some(face) = face else {
            return Some("warning.face_not_detected_message");
        };
        let width = face.width();
        let height = face.height();
        if !(self.min_width <= width && width <= self.max_width) {
            return Some("warning.wrong_face_width_message");
        }
        if !(self.min_height <= height && height <= self.max_height) {
            return Some("warning.wrong_face_height_message");
        }
        let center_x = (face.left + face.right) / 2.0;
        let center_y = (face.top + face.bottom) / 2.0;
        if (center_x - 0.5).abs() > self.center_offset
            || (center_y - 0.5).abs() > self.center_offset
        {
            return Some("warning.wrong_face_center_message");
        }
        None
    }
}
