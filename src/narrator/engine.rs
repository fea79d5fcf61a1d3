//! Speech playback engine: the play/pause/resume/stop state machine.
//!
//! State: IDLE → SPEAKING ⇄ PAUSED → IDLE
//!
//! The engine owns one chunk queue at a time and keeps at most one chunk in
//! flight at the primitive. Every re-entry (primitive `started`/`finished`
//! signals and the engine's own `Advance` continuations) arrives through
//! [`PlaybackEngine::handle`]; signals tagged with a stale session, or
//! arriving after `stop()`, are dropped.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::primitive::{
    resolve_voice, Activity, EngineEvent, EventSink, SessionId, SpeechPrimitive, Utterance,
    UtteranceTag,
};
use super::segment::segment;
use crate::config::SpeechConfig;
use crate::notifier::Notifier;

/// Called with `(chunk_index, chunk_count)` when a chunk starts sounding.
pub type ChunkStartCallback = Box<dyn FnMut(usize, usize) + Send>;
/// Called once when a session runs to completion. Never called on `stop()`.
pub type EndCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Idle,
    Speaking,
    Paused,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Speaking => write!(f, "speaking"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// One narration attempt, from `speak()` to completion or `stop()`.
#[derive(Default)]
struct Session {
    id: SessionId,
    chunks: Vec<String>,
    cursor: usize,
    in_flight: Option<usize>,
    finished: bool,
    voice: Option<String>,
    consecutive_errors: u32,
    on_chunk_start: Option<ChunkStartCallback>,
    on_end: Option<EndCallback>,
}

pub struct PlaybackEngine<P: SpeechPrimitive> {
    primitive: P,
    events: EventSink,
    notifier: Notifier,
    config: SpeechConfig,

    session: Session,
    last_session_id: SessionId,
    cancelled: bool,
    paused: bool,
    warned_unavailable: bool,

    status: watch::Sender<Status>,
}

impl<P: SpeechPrimitive> PlaybackEngine<P> {
    /// `events` must be the sink paired with the receiver that feeds
    /// [`handle`](Self::handle).
    pub fn new(primitive: P, events: EventSink, config: &SpeechConfig, notifier: Notifier) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            primitive,
            events,
            notifier,
            config: config.clone(),
            session: Session::default(),
            last_session_id: 0,
            cancelled: false,
            paused: false,
            warned_unavailable: false,
            status,
        }
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.status() == Status::Speaking
    }

    pub fn is_paused(&self) -> bool {
        self.status() == Status::Paused
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn cursor(&self) -> usize {
        self.session.cursor
    }

    pub fn queue_len(&self) -> usize {
        self.session.chunks.len()
    }

    /// Start narrating `text`, replacing any current session.
    pub fn speak(
        &mut self,
        text: &str,
        on_chunk_start: Option<ChunkStartCallback>,
        on_end: Option<EndCallback>,
    ) {
        if !self.primitive.is_available() {
            warn!("Speech output unavailable, ignoring speak request");
            if !self.warned_unavailable {
                self.warned_unavailable = true;
                self.notifier.notify(
                    "Speech unavailable",
                    "No speech engine is loaded, text will not be read aloud.",
                );
            }
            return;
        }

        let text = text.trim();
        if text.is_empty() {
            debug!("Empty text, nothing to speak");
            return;
        }

        self.stop();
        self.cancelled = false;
        self.paused = false;

        let chunks = segment(text, self.config.max_chunk_len);
        let voice = resolve_voice(&self.primitive.voices(), &self.config.voice, &self.config.lang)
            .map(|v| v.id);

        self.last_session_id += 1;
        info!(
            "Session {}: {} chars in {} chunks (voice: {})",
            self.last_session_id,
            text.chars().count(),
            chunks.len(),
            voice.as_deref().unwrap_or("default"),
        );

        self.session = Session {
            id: self.last_session_id,
            chunks,
            voice,
            on_chunk_start,
            on_end,
            ..Session::default()
        };
        self.drive();
    }

    /// Pause narration. With nothing live this only arms the pause flag.
    pub fn pause(&mut self) {
        self.paused = true;
        self.primitive.pause();
        if self.is_live() {
            self.set_status(Status::Paused);
        }
    }

    /// Resume narration. A no-op once the session has completed.
    pub fn resume(&mut self) {
        self.paused = false;
        self.primitive.resume();
        if !self.is_live() {
            return;
        }
        self.set_status(Status::Speaking);

        // Paused exactly between two chunks: nothing is sounding and nothing
        // will signal, so push the next chunk ourselves.
        if self.session.in_flight.is_none() && self.primitive.activity() == Activity::Idle {
            debug!("Resumed at chunk boundary {}", self.session.cursor);
            self.drive();
        }
    }

    /// Cancel the current session. Late signals for it are ignored.
    pub fn stop(&mut self) {
        self.cancelled = true;
        self.paused = false;
        self.primitive.cancel_all();
        self.set_status(Status::Idle);
        if !self.session.chunks.is_empty() {
            info!(
                "Session {} stopped at chunk {}/{}",
                self.session.id,
                self.session.cursor,
                self.session.chunks.len()
            );
        }
        self.session = Session::default();
    }

    /// Process one engine event. This is the only re-entry point.
    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Started(tag) => self.on_started(tag),
            EngineEvent::Finished(tag, outcome) => self.on_finished(tag, outcome),
            EngineEvent::Advance(session) => self.on_advance(session),
        }
    }

    fn is_live(&self) -> bool {
        !self.cancelled && !self.session.finished && !self.session.chunks.is_empty()
    }

    fn is_current(&self, tag: UtteranceTag) -> bool {
        !self.cancelled && tag.session == self.session.id && self.session.in_flight == Some(tag.index)
    }

    fn on_started(&mut self, tag: UtteranceTag) {
        if !self.is_current(tag) {
            debug!("Ignoring stale start for {tag:?}");
            return;
        }

        self.set_status(if self.paused { Status::Paused } else { Status::Speaking });

        let total = self.session.chunks.len();
        if let Some(callback) = self.session.on_chunk_start.as_mut() {
            callback(tag.index, total);
        }
    }

    fn on_finished(&mut self, tag: UtteranceTag, outcome: Result<(), String>) {
        if !self.is_current(tag) {
            debug!("Ignoring stale completion for {tag:?}");
            return;
        }
        self.session.in_flight = None;

        match outcome {
            Ok(()) => self.session.consecutive_errors = 0,
            Err(e) => {
                self.session.consecutive_errors += 1;
                warn!("Chunk {} failed, skipping: {e}", tag.index);

                let cap = self.config.max_consecutive_errors;
                if cap > 0 && self.session.consecutive_errors >= cap {
                    warn!(
                        "Session {}: {} chunks failed in a row, giving up",
                        self.session.id, self.session.consecutive_errors
                    );
                    self.session.cursor = self.session.chunks.len();
                    self.drive();
                    return;
                }
            }
        }

        self.session.cursor += 1;

        if self.paused {
            debug!("Paused at chunk boundary {}", self.session.cursor);
            return;
        }
        self.events.advance(self.session.id);
    }

    fn on_advance(&mut self, session: SessionId) {
        if self.cancelled || session != self.session.id {
            return;
        }
        if self.paused {
            // resume() picks it up from here
            return;
        }
        self.drive();
    }

    /// Submit the chunk at the cursor, or finish the session if none remain.
    fn drive(&mut self) {
        if self.cancelled || self.session.in_flight.is_some() {
            return;
        }

        let total = self.session.chunks.len();
        let index = self.session.cursor;

        if index >= total {
            self.session.finished = true;
            self.set_status(Status::Idle);
            info!("Session {} finished ({total} chunks)", self.session.id);
            if let Some(on_end) = self.session.on_end.take() {
                on_end();
            }
            return;
        }

        let tag = UtteranceTag {
            session: self.session.id,
            index,
        };
        self.session.in_flight = Some(index);
        debug!("Submitting chunk {}/{total}", index + 1);

        self.primitive.submit(Utterance {
            tag,
            text: self.session.chunks[index].clone(),
            lang: self.config.lang.clone(),
            rate: self.config.rate,
            pitch: self.config.pitch,
            voice: self.session.voice.clone(),
        });
    }

    fn set_status(&self, next: Status) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Status: {current} → {next}");
            *current = next;
            true
        });
    }
}
