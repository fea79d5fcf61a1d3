//! Async front for the playback engine.
//!
//! The engine lives on one tokio task; transport commands and engine events
//! are serialized through a single `select!` loop, so the engine itself needs
//! no locking. [`Narrator`] is the cheap, cloneable handle callers hold.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::engine::{ChunkStartCallback, EndCallback, PlaybackEngine, Status};
use super::primitive::{EngineEvent, SpeechPrimitive};

enum Command {
    Speak {
        text: String,
        on_chunk_start: Option<ChunkStartCallback>,
        on_end: Option<EndCallback>,
    },
    Pause,
    Resume,
    Stop,
}

#[derive(Clone)]
pub struct Narrator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
}

impl Narrator {
    /// Move `engine` onto its own task. `events` is the receiver paired with
    /// the sink the engine and its primitive were built with.
    pub fn spawn<P>(
        engine: PlaybackEngine<P>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        P: SpeechPrimitive + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let status = engine.subscribe();
        let handle = tokio::spawn(run(engine, command_rx, events));
        (Self { commands, status }, handle)
    }

    pub fn speak(
        &self,
        text: impl Into<String>,
        on_chunk_start: Option<ChunkStartCallback>,
        on_end: Option<EndCallback>,
    ) {
        self.send(Command::Speak {
            text: text.into(),
            on_chunk_start,
            on_end,
        });
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
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
        self.status.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Narrator task has exited, dropping command");
        }
    }
}

async fn run<P: SpeechPrimitive>(
    mut engine: PlaybackEngine<P>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Speak { text, on_chunk_start, on_end }) => {
                        engine.speak(&text, on_chunk_start, on_end);
                    }
                    Some(Command::Pause) => engine.pause(),
                    Some(Command::Resume) => engine.resume(),
                    Some(Command::Stop) => engine.stop(),
                    None => {
                        info!("All narrator handles dropped, shutting down");
                        engine.stop();
                        break;
                    }
                }
            }
            Some(event) = events.recv() => engine.handle(event),
        }
    }
}
