//! Named-scalar signal stream from the face extractor.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;

/// One delivery from the face extractor: every scalar it observed on a
/// single frame, stamped with a monotonic time.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    /// Scalars addressed by name (blendshape activations, head pose).
    pub values: HashMap<String, f64>,
    /// Scalars addressed by the extractor's fixed slot numbers.
    pub indexed: Vec<(usize, f64)>,
    /// When the extractor observed these values.
    pub at: Instant,
}

impl SignalBatch {
    pub fn new(at: Instant) -> Self {
        Self {
            values: HashMap::new(),
            indexed: Vec::new(),
            at,
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_indexed(mut self, index: usize, value: f64) -> Self {
        self.indexed.push((index, value));
        self
    }
}

/// Producer half of the signal bus; held by the face extractor, which may
/// push from a worker thread.
pub type SignalSender = mpsc::UnboundedSender<SignalBatch>;

/// Consumer half of the signal bus; drained on the session's request path,
/// which keeps signal intake serialized with the sequencer state.
pub type SignalReceiver = mpsc::UnboundedReceiver<SignalBatch>;

/// Creates the single-producer stream connecting a face extractor to a
/// session. Batches are delivered in send order.
pub fn signal_bus() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}
