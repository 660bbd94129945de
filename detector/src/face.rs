//! Face-landmark extraction seam.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::protocol::Frame;
use crate::signal::SignalSender;

/// External face-landmark collaborator.
///
/// Implementations receive every decoded camera frame and publish the
/// scalars they extract onto the signal bus. They may complete
/// asynchronously from a worker thread; batches are applied in send order
/// on the session's request path.
pub trait FaceExtractor: Send {
    fn process_frame(&mut self, frame: &Frame, signals: &SignalSender);
}

/// Extractor used when no landmark backend is linked in. Frames are
/// accepted and dropped; the signal bus stays silent.
#[derive(Debug)]
pub struct Disabled {
    model_path: PathBuf,
}

impl Disabled {
    pub fn new(model_path: &Path) -> Self {
        debug!(model = %model_path.display(), "face extraction disabled, model not loaded");
        Self {
            model_path: model_path.to_owned(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl FaceExtractor for Disabled {
    fn process_frame(&mut self, _frame: &Frame, _signals: &SignalSender) {}
}
