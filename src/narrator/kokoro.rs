//! Kokoro speech primitive: text → phonemes → ONNX inference → rodio sink.
//!
//! Pipeline per utterance:
//! 1. Utterance text → phonemes (misaki-rs G2P)
//! 2. Phonemes → token IDs (tokenizer.json vocabulary)
//! 3. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 4. Audio → rodio Sink; `started` once appended, `finished` once drained
//!
//! Pause/resume map onto the sink, so a paused chunk keeps its position.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use super::primitive::{Activity, EventSink, SpeechPrimitive, Utterance, UtteranceTag, VoiceDescriptor};
use crate::config::SpeechConfig;
use crate::error::ReaderError;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Voice style vectors indexed by token count, shape (510, 256).
struct VoiceStyle {
    styles: Array2<f32>,
}

/// Everything needed for inference. Shared with blocking synthesis tasks.
struct KokoroModel {
    // ort 2.0 Session::run needs &mut
    session: Mutex<ort::session::Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceStyle>,
}

impl KokoroModel {
    fn load(config: &SpeechConfig) -> Result<Self, ReaderError> {
        let vocab = load_vocab(Path::new(&config.tokenizer_path))?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        let voices = load_voice_styles(Path::new(&config.voices_path))?;
        info!("Loaded {} voices", voices.len());

        info!("Loading ONNX model from {}", config.model_path);
        let load_err = |stage: &str, e: &dyn std::fmt::Display| {
            ReaderError::ModelLoad(format!("{stage}: {e}"))
        };
        let session = ort::session::Session::builder()
            .map_err(|e| load_err("session builder", &e))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| load_err("optimization level", &e))?
            .with_intra_threads(4)
            .map_err(|e| load_err("thread count", &e))?
            .commit_from_file(&config.model_path)
            .map_err(|e| load_err("ONNX model", &e))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            voices,
        })
    }

    /// Render one chunk to mono samples at [`SAMPLE_RATE`].
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<f32>, String> {
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Unknown phoneme characters are dropped; 0 pads both ends.
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0);
        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        let style = self
            .voices
            .get(voice)
            .ok_or_else(|| format!("Voice not found: {voice}"))?;
        let style_idx = n_tokens.saturating_sub(2).min(style.styles.nrows() - 1);
        let style_vec: Vec<f32> = style.styles.row(style_idx).to_vec();

        let tokens = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| format!("Bad tokens shape: {e}"))?;
        let style_arr = Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Bad style shape: {e}"))?;
        let speed_arr = ndarray::Array1::from_vec(vec![speed]);

        let inputs = ort::inputs![
            "tokens" => Tensor::from_array(tokens).map_err(|e| e.to_string())?,
            "style" => Tensor::from_array(style_arr).map_err(|e| e.to_string())?,
            "speed" => Tensor::from_array(speed_arr).map_err(|e| e.to_string())?
        ];

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(inputs)
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        let (_name, audio) = outputs.iter().next().ok_or("No output tensor from model")?;
        let (_shape, samples) = audio
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        Ok(samples.to_vec())
    }
}

/// Local Kokoro text-to-speech primitive.
pub struct KokoroSpeech {
    model: Option<Arc<KokoroModel>>,
    // In rodio 0.21, OutputStream is the handle; kept alive for process lifetime
    output_stream: Option<OutputStream>,
    default_voice: String,
    events: EventSink,

    /// Sink of the utterance currently submitted, if any.
    active_sink: Arc<Mutex<Option<Sink>>>,
    paused: bool,
    /// Bumped by `cancel_all` so in-flight deliveries know they were dropped.
    epoch: Arc<AtomicU64>,
}

impl KokoroSpeech {
    /// Load model, voices and audio output. Blocking; call once at startup.
    pub fn load(config: &SpeechConfig, events: EventSink) -> Result<Self, ReaderError> {
        let t0 = Instant::now();
        let model = KokoroModel::load(config)?;

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|_| ReaderError::CapabilityUnavailable("audio output"))?;

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());
        Ok(Self {
            model: Some(Arc::new(model)),
            output_stream: Some(stream),
            ..Self::unavailable(config, events)
        })
    }

    /// A primitive that reports itself unavailable; every speak is a no-op.
    pub fn unavailable(config: &SpeechConfig, events: EventSink) -> Self {
        Self {
            model: None,
            output_stream: None,
            default_voice: config.voice.clone(),
            events,
            active_sink: Arc::new(Mutex::new(None)),
            paused: false,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn sink_slot(&self) -> MutexGuard<'_, Option<Sink>> {
        self.active_sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpeechPrimitive for KokoroSpeech {
    fn is_available(&self) -> bool {
        self.model.is_some() && self.output_stream.is_some()
    }

    fn voices(&self) -> Vec<VoiceDescriptor> {
        let Some(model) = &self.model else {
            return Vec::new();
        };
        let mut voices: Vec<VoiceDescriptor> = model
            .voices
            .keys()
            .map(|id| VoiceDescriptor {
                id: id.clone(),
                lang: voice_language(id).to_string(),
            })
            .collect();
        voices.sort_by(|a, b| a.id.cmp(&b.id));
        voices
    }

    fn submit(&mut self, utterance: Utterance) {
        let tag = utterance.tag;
        let (Some(model), Some(stream)) = (self.model.clone(), self.output_stream.as_ref()) else {
            self.events.finished(tag, Err("speech model not loaded".into()));
            return;
        };

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        if self.paused {
            sink.pause();
        }
        *self.sink_slot() = Some(sink);

        let delivery = Delivery {
            tag,
            text: utterance.text,
            voice: utterance.voice.unwrap_or_else(|| self.default_voice.clone()),
            speed: utterance.rate,
            model,
            active_sink: self.active_sink.clone(),
            epoch: self.epoch.clone(),
            submitted_epoch: self.epoch.load(Ordering::SeqCst),
            events: self.events.clone(),
        };
        tokio::spawn(async move {
            let events = delivery.events.clone();
            let outcome = delivery.run().await;
            events.finished(tag, outcome);
        });
    }

    fn pause(&mut self) {
        self.paused = true;
        if let Some(sink) = self.sink_slot().as_ref() {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        self.paused = false;
        if let Some(sink) = self.sink_slot().as_ref() {
            sink.play();
        }
    }

    fn cancel_all(&mut self) {
        self.paused = false;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = self.sink_slot().take() {
            sink.stop();
            info!("Speech cancelled");
        }
    }

    fn activity(&self) -> Activity {
        match self.sink_slot().as_ref() {
            Some(sink) if sink.is_paused() => Activity::Paused,
            Some(sink) if !sink.empty() => Activity::Sounding,
            _ => Activity::Idle,
        }
    }
}

/// One utterance on its way through synthesis and playback.
struct Delivery {
    tag: UtteranceTag,
    text: String,
    voice: String,
    speed: f32,
    model: Arc<KokoroModel>,
    active_sink: Arc<Mutex<Option<Sink>>>,
    epoch: Arc<AtomicU64>,
    submitted_epoch: u64,
    events: EventSink,
}

impl Delivery {
    fn cancelled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.submitted_epoch
    }

    fn slot(&self) -> MutexGuard<'_, Option<Sink>> {
        self.active_sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self) -> Result<(), String> {
        let t_gen = Instant::now();
        let model = self.model.clone();
        let (text, voice, speed) = (self.text.clone(), self.voice.clone(), self.speed);
        let samples = tokio::task::spawn_blocking(move || model.synthesize(&text, &voice, speed))
            .await
            .map_err(|e| format!("Synthesis task failed: {e}"))??;
        debug!(
            "Chunk {}: generated {:.1}s of audio in {}ms",
            self.tag.index,
            samples.len() as f32 / SAMPLE_RATE as f32,
            t_gen.elapsed().as_millis()
        );

        if self.cancelled() {
            return Err("cancelled".into());
        }
        if samples.is_empty() {
            return Ok(());
        }

        if !append_current(&self.active_sink, &self.epoch, self.submitted_epoch, samples) {
            return Err("cancelled".into());
        }
        self.events.started(self.tag);

        let t_play = Instant::now();
        loop {
            if self.cancelled() {
                return Err("cancelled".into());
            }
            let drained = self.slot().as_ref().map_or(true, Sink::empty);
            if drained {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        debug!("Chunk {}: played in {}ms", self.tag.index, t_play.elapsed().as_millis());

        // Only this delivery is in flight for the current epoch.
        if !self.cancelled() {
            *self.slot() = None;
        }
        Ok(())
    }
}

/// Queue `samples` on the active sink, unless a cancel has bumped the epoch
/// since submission. The epoch is read under the slot lock so a newer
/// session's sink never receives stale audio.
fn append_current(
    active_sink: &Mutex<Option<Sink>>,
    epoch: &AtomicU64,
    submitted_epoch: u64,
    samples: Vec<f32>,
) -> bool {
    let slot = active_sink.lock().unwrap_or_else(PoisonError::into_inner);
    if epoch.load(Ordering::SeqCst) != submitted_epoch {
        return false;
    }
    match slot.as_ref() {
        Some(sink) => {
            sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
            true
        }
        None => false,
    }
}

/// Kokoro voice names encode the language in their first letter.
fn voice_language(voice: &str) -> &'static str {
    match voice.chars().next() {
        Some('a') => "en-US",
        Some('b') => "en-GB",
        Some('e') => "es-ES",
        Some('f') => "fr-FR",
        Some('h') => "hi-IN",
        Some('i') => "it-IT",
        Some('j') => "ja-JP",
        Some('p') => "pt-BR",
        Some('z') => "zh-CN",
        _ => "und",
    }
}

/// Load the character → token ID vocabulary from tokenizer.json.
fn load_vocab(path: &Path) -> Result<HashMap<char, i64>, ReaderError> {
    let contents = fs::read_to_string(path)?;
    let data: serde_json::Value = serde_json::from_str(&contents)?;
    let entries = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| ReaderError::ModelLoad("missing model.vocab in tokenizer".into()))?;

    let mut vocab = HashMap::with_capacity(entries.len());
    for (token, id) in entries {
        let id = id
            .as_i64()
            .ok_or_else(|| ReaderError::ModelLoad(format!("token {token:?} has a non-integer id")))?;
        if let Some(ch) = token.chars().next() {
            vocab.insert(ch, id);
        }
    }
    Ok(vocab)
}

/// Load every voice style from the NPZ archive, squeezing (510, 1, 256) to
/// (510, 256).
fn load_voice_styles(path: &Path) -> Result<HashMap<String, VoiceStyle>, ReaderError> {
    let npz_err = |e: ndarray_npy::ReadNpzError| ReaderError::ModelLoad(format!("voices archive: {e}"));

    let mut npz = NpzReader::new(fs::File::open(path)?).map_err(npz_err)?;
    let entries = npz.names().map_err(npz_err)?;

    let mut voices = HashMap::with_capacity(entries.len());
    for entry in entries {
        let arr: Array3<f32> = npz.by_name(&entry).map_err(npz_err)?;
        let (rows, width) = (arr.shape()[0], arr.shape()[2]);
        let styles = arr
            .into_shape_with_order((rows, width))
            .map_err(|e| ReaderError::ModelLoad(format!("voice {entry}: {e}")))?;

        let name = entry.trim_end_matches(".npy").to_string();
        voices.insert(name, VoiceStyle { styles });
    }
    Ok(voices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::primitive::{event_channel, resolve_voice, EngineEvent};

    #[test]
    fn voice_prefix_maps_to_language() {
        assert_eq!(voice_language("af_heart"), "en-US");
        assert_eq!(voice_language("bm_george"), "en-GB");
        assert_eq!(voice_language("ef_dora"), "es-ES");
        assert_eq!(voice_language("zf_xiaobei"), "zh-CN");
        assert_eq!(voice_language("xx"), "und");
    }

    #[test]
    fn vocab_is_read_from_tokenizer_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        fs::write(&path, r#"{"model": {"vocab": {"a": 43, "ˈ": 156, "$": 0}}}"#).unwrap();

        let vocab = load_vocab(&path).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab[&'ˈ'], 156);
    }

    #[test]
    fn vocab_without_model_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        fs::write(&path, r#"{"vocab": {}}"#).unwrap();

        assert!(matches!(load_vocab(&path), Err(ReaderError::ModelLoad(_))));
    }

    #[test]
    fn missing_model_files_fail_to_load() {
        let (sink, _rx) = event_channel();
        let config = SpeechConfig {
            tokenizer_path: "/nonexistent/tokenizer.json".into(),
            ..SpeechConfig::default()
        };
        assert!(matches!(KokoroSpeech::load(&config, sink), Err(ReaderError::Io(_))));
    }

    #[test]
    fn full_locale_resolves_kokoro_voices() {
        let voices: Vec<VoiceDescriptor> = ["af_heart", "ef_dora", "if_sara"]
            .into_iter()
            .map(|id| VoiceDescriptor {
                id: id.into(),
                lang: voice_language(id).into(),
            })
            .collect();

        let picked = resolve_voice(&voices, "", "es-ES").unwrap();
        assert_eq!(picked.id, "ef_dora");
        assert_eq!(resolve_voice(&voices, "", "it").unwrap().id, "if_sara");
    }

    #[test]
    fn cancel_releases_pause_latch() {
        let (sink, _rx) = event_channel();
        let mut speech = KokoroSpeech::unavailable(&SpeechConfig::default(), sink);
        speech.pause();
        assert!(speech.paused);
        speech.cancel_all();
        assert!(!speech.paused);
    }

    #[test]
    fn stale_audio_never_reaches_a_newer_sink() {
        let (sink, _queue) = Sink::new();
        let slot = Mutex::new(Some(sink));
        let epoch = AtomicU64::new(0);

        // Submitted at epoch 0, then a stop and a new session bump it.
        epoch.fetch_add(1, Ordering::SeqCst);
        assert!(!append_current(&slot, &epoch, 0, vec![0.0; 64]));
        assert_eq!(slot.lock().unwrap().as_ref().unwrap().len(), 0);

        assert!(append_current(&slot, &epoch, 1, vec![0.0; 64]));
        assert_eq!(slot.lock().unwrap().as_ref().unwrap().len(), 1);
    }

    #[test]
    fn nothing_is_appended_once_the_slot_is_cleared() {
        let slot = Mutex::new(None);
        let epoch = AtomicU64::new(3);
        assert!(!append_current(&slot, &epoch, 3, vec![0.0; 8]));
    }

    #[tokio::test]
    async fn unavailable_primitive_fails_submissions() {
        let (sink, mut rx) = event_channel();
        let mut speech = KokoroSpeech::unavailable(&SpeechConfig::default(), sink);
        assert!(!speech.is_available());
        assert!(speech.voices().is_empty());
        assert_eq!(speech.activity(), Activity::Idle);

        let tag = UtteranceTag { session: 1, index: 0 };
        speech.submit(Utterance {
            tag,
            text: "Hello.".into(),
            lang: "en-US".into(),
            rate: 1.0,
            pitch: 1.0,
            voice: None,
        });
        assert!(matches!(rx.recv().await, Some(EngineEvent::Finished(t, Err(_))) if t == tag));
    }
}
