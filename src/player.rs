//! Unified transport: one play/pause/resume/stop drives both narration and
//! the image rotation.
//!
//! Narration and rotation are not coupled directly. Both follow the shared
//! "media active" flag: the transport sets it, the narrator's end callback
//! clears it, and a watcher task reconfigures the rotation whenever it (or
//! the image count) changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ImagesConfig;
use crate::images::{preload, ImageCache, ImageItem, ImageRotation, UnsplashClient};
use crate::narrator::{Narrator, Status};
use crate::notifier::Notifier;
use crate::session::SessionStore;

/// Inputs of the image rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MediaState {
    active: bool,
    total: usize,
}

#[derive(Default)]
struct Gallery {
    images: Vec<ImageItem>,
    ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub narration: String,
    pub media_active: bool,
    pub image_index: usize,
    pub image_count: usize,
    pub images_ready: bool,
    pub current_image: Option<ImageItem>,
    pub topic: String,
    pub text_chars: usize,
}

pub struct Player {
    narrator: Narrator,
    unsplash: UnsplashClient,
    cache: ImageCache,
    notifier: Notifier,
    config: ImagesConfig,
    session: Mutex<SessionStore>,
    warned_no_key: AtomicBool,

    rotation: Arc<ImageRotation>,
    gallery: Arc<Mutex<Gallery>>,
    media: Arc<watch::Sender<MediaState>>,

    pending_load: Mutex<Option<JoinHandle<()>>>,
    watchers: Vec<JoinHandle<()>>,
}

impl Player {
    pub fn new(
        narrator: Narrator,
        unsplash: UnsplashClient,
        config: &ImagesConfig,
        session: SessionStore,
        notifier: Notifier,
    ) -> Arc<Self> {
        let rotation = Arc::new(ImageRotation::new());
        let gallery = Arc::new(Mutex::new(Gallery::default()));
        let (media, _) = watch::channel(MediaState::default());
        let media = Arc::new(media);

        let watchers = vec![
            spawn_rotation_driver(media.subscribe(), rotation.clone(), config.interval_ms),
            spawn_image_announcer(rotation.subscribe(), gallery.clone()),
            spawn_status_logger(narrator.subscribe()),
        ];

        Arc::new(Self {
            narrator,
            unsplash,
            cache: ImageCache::default(),
            notifier,
            config: config.clone(),
            session: Mutex::new(session),
            warned_no_key: AtomicBool::new(false),
            rotation,
            gallery,
            media,
            pending_load: Mutex::new(None),
            watchers,
        })
    }

    /// Start or continue narration and the slideshow. Without text this is
    /// a plain slideshow.
    pub async fn play(&self) {
        if self.gallery().images.is_empty() {
            // Load now instead of waiting out a pending topic debounce.
            if let Some(pending) = self.pending_load.lock().unwrap_or_else(PoisonError::into_inner).take() {
                pending.abort();
            }
            self.shuffle().await;
        }

        let text = self.session().text().trim().to_string();
        if !text.is_empty() {
            if self.narrator.is_paused() {
                self.narrator.resume();
            } else if !self.narrator.is_speaking() {
                let media = self.media.clone();
                self.narrator.speak(
                    text,
                    Some(Box::new(|index, total| {
                        debug!("Narrating chunk {}/{total}", index + 1);
                    })),
                    Some(Box::new(move || {
                        info!("Narration finished");
                        media.send_if_modified(|m| std::mem::replace(&mut m.active, false));
                    })),
                );
            }
        }

        self.set_media_active(true);
    }

    pub fn pause(&self) {
        self.narrator.pause();
        self.set_media_active(false);
    }

    pub fn resume(&self) {
        self.narrator.resume();
        self.set_media_active(true);
    }

    pub fn stop(&self) {
        self.narrator.stop();
        self.set_media_active(false);
        self.rotation.reset();
    }

    /// Fetch a fresh batch of images for the current topic (or one inferred
    /// from the text) and preload them.
    pub async fn shuffle(&self) {
        let topic = self.session().effective_topic();
        if topic.is_empty() {
            debug!("No topic for images");
            return;
        }
        if !self.unsplash.has_key() {
            warn!("No Unsplash access key, skipping image search");
            if self.warned_no_key.swap(true, Ordering::Relaxed) {
                return;
            }
            self.notifier.notify(
                "Images unavailable",
                "Set images.access_key or UNSPLASH_ACCESS_KEY to load images.",
            );
            return;
        }

        self.gallery().ready = false;
        self.rotation.reset();

        match self.unsplash.fetch_images_for_topic(&topic, self.config.count).await {
            Ok(images) => {
                let urls: Vec<String> = images.iter().map(|i| i.url.clone()).collect();
                self.set_images(images);
                self.cache.retain(&urls);

                let loaded = preload(self.unsplash.http(), &urls, &self.cache).await;
                self.gallery().ready = true;

                if urls.is_empty() {
                    self.notifier.notify("No images", "No images found for that topic.");
                } else {
                    info!("{loaded}/{} images preloaded for \"{topic}\"", urls.len());
                }
            }
            Err(e) => {
                warn!("Image search failed: {e}");
                self.notifier.notify(
                    "Image search failed",
                    "Error loading images. Check the Unsplash key or quota.",
                );
                self.set_images(Vec::new());
                self.cache.clear();
            }
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        if let Err(e) = self.session().set_text(text) {
            warn!("Failed to save session: {e}");
        }
    }

    /// Change the image topic. Current images are dropped and reload after a
    /// debounce; an empty topic leaves the gallery empty.
    pub fn set_topic(self: &Arc<Self>, topic: impl Into<String>) {
        let topic = topic.into();
        if let Err(e) = self.session().set_topic(topic.clone()) {
            warn!("Failed to save session: {e}");
        }

        let mut pending = self.pending_load.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        self.set_images(Vec::new());
        self.rotation.reset();
        if topic.trim().is_empty() {
            self.cache.clear();
            return;
        }

        let player = Arc::downgrade(self);
        let delay = Duration::from_millis(self.config.debounce_ms);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(player) = player.upgrade() {
                player.shuffle().await;
            }
        }));
    }

    pub fn status(&self) -> PlayerStatus {
        let index = self.rotation.index();
        let gallery = self.gallery();
        let session = self.session();
        PlayerStatus {
            narration: self.narrator.status().to_string(),
            media_active: self.media.borrow().active,
            image_index: index,
            image_count: gallery.images.len(),
            images_ready: gallery.ready,
            current_image: gallery.ready.then(|| gallery.images.get(index).cloned()).flatten(),
            topic: session.topic().to_string(),
            text_chars: session.text().chars().count(),
        }
    }

    /// Preloaded bytes of the image currently on display.
    pub fn current_image_bytes(&self) -> Option<Vec<u8>> {
        let url = {
            let gallery = self.gallery();
            gallery.images.get(self.rotation.index())?.url.clone()
        };
        self.cache.get(&url)
    }

    fn set_media_active(&self, active: bool) {
        self.media
            .send_if_modified(|m| std::mem::replace(&mut m.active, active) != active);
    }

    fn set_images(&self, images: Vec<ImageItem>) {
        let total = images.len();
        *self.gallery() = Gallery { images, ready: false };
        self.media
            .send_if_modified(|m| std::mem::replace(&mut m.total, total) != total);
    }

    fn gallery(&self) -> MutexGuard<'_, Gallery> {
        self.gallery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, SessionStore> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
        if let Some(handle) = self.pending_load.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

/// Reconfigure the rotation whenever the media flag or image count changes.
fn spawn_rotation_driver(
    mut media: watch::Receiver<MediaState>,
    rotation: Arc<ImageRotation>,
    interval_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while media.changed().await.is_ok() {
            let state = *media.borrow_and_update();
            debug!("Media {:?}", state);
            rotation.configure(state.total, interval_ms, state.active);
        }
    })
}

fn spawn_status_logger(mut status: watch::Receiver<Status>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            info!("Narration {}", *status.borrow_and_update());
        }
    })
}

/// Log the image on display whenever the rotation moves.
fn spawn_image_announcer(
    mut index: watch::Receiver<usize>,
    gallery: Arc<Mutex<Gallery>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while index.changed().await.is_ok() {
            let i = *index.borrow_and_update();
            let gallery = gallery.lock().unwrap_or_else(PoisonError::into_inner);
            if !gallery.ready {
                continue;
            }
            if let Some(image) = gallery.images.get(i) {
                info!(
                    "Image {}/{}: {} (Photo by {} on Unsplash)",
                    i + 1,
                    gallery.images.len(),
                    image.url,
                    image.author_name
                );
            }
        }
    })
}
