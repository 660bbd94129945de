//! Overlay rendering seam.

use std::path::PathBuf;

use crate::guidance::FaceBox;
use crate::protocol::Frame;

/// How the detected face region is presented back to the subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShowFace {
    /// No face feedback drawn.
    #[default]
    Hidden,
    /// Outline the detected face box.
    Outline,
    /// Pixelate everything outside the face box.
    PixelateOutside,
}

/// Everything the renderer needs to annotate one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    /// The current challenge prompt.
    pub text: String,
    /// Icon accompanying the prompt, if the challenge has one.
    pub icon: Option<PathBuf>,
    /// Placement warning shown alongside the prompt.
    pub warning: Option<String>,
    pub face_box: Option<FaceBox>,
    pub show_face: ShowFace,
}

/// External drawing collaborator. Fonts, codecs and compositing live on the
/// other side of this trait.
pub trait OverlayRenderer: Send {
    fn render(&mut self, frame: Frame, overlay: &Overlay) -> Frame;
}

/// Renderer that returns frames untouched; stands in where no drawing
/// backend is linked.
#[derive(Debug, Default)]
pub struct Passthrough;

impl OverlayRenderer for Passthrough {
    fn render(&mut self, frame: Frame, _overlay: &Overlay) -> Frame {
        frame
    }
}
