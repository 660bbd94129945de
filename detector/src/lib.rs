//! Gesture-challenge liveness verification.
//!
//! A remote client streams camera frames over a local socket. An external
//! face-landmark backend turns each frame into named scalar signals
//! (blendshape activations, head pose), which drive per-gesture state
//! machines. A challenge sequencer asks the subject for a randomized series
//! of gestures, enforces per-gesture time budgets, and reports the liveness
//! verdict together with picture-capture requests back over the socket.

pub mod challenge;
pub mod detector;
pub mod face;
pub mod gesture;
pub mod guidance;
pub mod overlay;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod translation;
