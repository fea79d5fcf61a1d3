//! Narrator: chunked, pausable text-to-speech playback.
//!
//! Components:
//! - `segment`: text → bounded sentence-packed chunks
//! - `primitive`: the speech output contract, its signals and voice resolution
//! - `engine`: the play/pause/resume/stop state machine over a primitive
//! - `driver`: tokio task owning the engine, plus the `Narrator` handle
//! - `kokoro`: local Kokoro ONNX + rodio implementation of the primitive

pub mod driver;
pub mod engine;
pub mod kokoro;
pub mod primitive;
pub mod segment;

pub use driver::Narrator;
pub use engine::{PlaybackEngine, Status};
