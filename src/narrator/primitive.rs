//! Contract between the playback engine and the speech output primitive.
//!
//! The primitive turns one utterance at a time into audio and reports back
//! through an [`EventSink`] with two signals per utterance: `started` and
//! `finished`. Every signal carries the [`UtteranceTag`] it was submitted
//! with so the engine can discard signals from superseded sessions.

use tokio::sync::mpsc;
use tracing::debug;

/// Monotonic identifier of one narration session.
pub type SessionId = u64;

/// Identifies a submitted utterance: which session, which chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtteranceTag {
    pub session: SessionId,
    pub index: usize,
}

/// One chunk handed to the primitive, with its synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub tag: UtteranceTag,
    pub text: String,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    /// Resolved voice identifier; `None` means the primitive's default.
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceDescriptor {
    pub id: String,
    pub lang: String,
}

/// What the primitive is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activity {
    Sounding,
    Paused,
    #[default]
    Idle,
}

/// Everything that re-enters the engine: primitive signals and the engine's
/// own scheduled continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started(UtteranceTag),
    /// Normal completion and delivery errors both land here.
    Finished(UtteranceTag, Result<(), String>),
    /// Continue driving the given session from its cursor.
    Advance(SessionId),
}

/// Sending half of the engine event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Create the engine event queue.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    pub fn started(&self, tag: UtteranceTag) {
        self.send(EngineEvent::Started(tag));
    }

    pub fn finished(&self, tag: UtteranceTag, outcome: Result<(), String>) {
        self.send(EngineEvent::Finished(tag, outcome));
    }

    pub(super) fn advance(&self, session: SessionId) {
        self.send(EngineEvent::Advance(session));
    }

    fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Engine event queue closed, dropping signal");
        }
    }
}

/// The external text-to-speech capability.
///
/// Implementations must emit exactly one `finished` signal per submitted
/// utterance (including after `cancel_all`), preceded by at most one
/// `started`.
pub trait SpeechPrimitive: Send {
    fn is_available(&self) -> bool;

    fn voices(&self) -> Vec<VoiceDescriptor>;

    fn submit(&mut self, utterance: Utterance);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Drop the current and any queued utterance immediately.
    fn cancel_all(&mut self);

    fn activity(&self) -> Activity;
}

/// Pick a voice: exact identifier, then language prefix, then the first
/// available voice. `None` leaves the choice to the primitive.
pub fn resolve_voice(
    voices: &[VoiceDescriptor],
    requested_id: &str,
    lang: &str,
) -> Option<VoiceDescriptor> {
    let exact = (!requested_id.is_empty())
        .then(|| voices.iter().find(|v| v.id == requested_id))
        .flatten();

    exact
        .or_else(|| voices.iter().find(|v| v.lang.starts_with(lang)))
        .or_else(|| voices.first())
        .cloned()
}
