//! Periodic image index rotation gated by an external "active" flag.
//!
//! Every reconfiguration tears down the previous ticker task before starting
//! a new one, so at most one ticker exists at any time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

/// Rotation never ticks faster than this.
pub const MIN_INTERVAL_MS: u64 = 500;

pub struct ImageRotation {
    index: Arc<watch::Sender<usize>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ImageRotation {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageRotation {
    pub fn new() -> Self {
        let (index, _) = watch::channel(0);
        Self {
            index: Arc::new(index),
            ticker: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        *self.index.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.index.subscribe()
    }

    /// Back to the first image. Works whether or not the rotation is active.
    pub fn reset(&self) {
        self.index.send_if_modified(|i| std::mem::replace(i, 0) != 0);
    }

    /// Apply new inputs: restart, freeze or stop the ticker accordingly.
    ///
    /// Must be called from within a tokio runtime when `active` is set.
    pub fn configure(&self, total: usize, interval_ms: u64, active: bool) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        // Keep the index inside the new range.
        self.index.send_if_modified(|i| {
            let wrapped = if total == 0 { 0 } else { *i % total };
            std::mem::replace(i, wrapped) != wrapped
        });

        if !active || total <= 1 {
            debug!("Image rotation frozen (total={total}, active={active})");
            return;
        }

        let period = Duration::from_millis(interval_ms.max(MIN_INTERVAL_MS));
        debug!("Image rotation every {}ms over {total} images", period.as_millis());

        let index = self.index.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                index.send_modify(|i| *i = (*i + 1) % total);
            }
        }));
    }
}

impl Drop for ImageRotation {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    /// Sleep just past the next tick of a 500ms rotation.
    async fn next_tick() {
        sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_through_all_images() {
        let rotation = ImageRotation::new();
        rotation.configure(5, 500, true);
        sleep(Duration::from_millis(1)).await;

        let mut seen = Vec::new();
        for _ in 0..6 {
            next_tick().await;
            seen.push(rotation.index());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_image_never_advances() {
        let rotation = ImageRotation::new();
        rotation.configure(1, 500, true);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(rotation.index(), 0);

        rotation.configure(0, 500, true);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(rotation.index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_rotation_is_frozen() {
        let rotation = ImageRotation::new();
        rotation.configure(5, 500, true);
        sleep(Duration::from_millis(1001)).await;
        assert_eq!(rotation.index(), 2);

        rotation.configure(5, 500, false);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(rotation.index(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_has_a_floor() {
        let rotation = ImageRotation::new();
        rotation.configure(5, 10, true);
        sleep(Duration::from_millis(499)).await;
        assert_eq!(rotation.index(), 0);
        sleep(Duration::from_millis(2)).await;
        assert_eq!(rotation.index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfiguring_does_not_stack_tickers() {
        let rotation = ImageRotation::new();
        rotation.configure(10, 500, true);
        rotation.configure(10, 500, true);
        rotation.configure(10, 500, true);
        sleep(Duration::from_millis(501)).await;
        assert_eq!(rotation.index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_first_image() {
        let rotation = ImageRotation::new();
        rotation.configure(5, 500, true);
        sleep(Duration::from_millis(1501)).await;
        assert_eq!(rotation.index(), 3);

        rotation.reset();
        assert_eq!(rotation.index(), 0);

        rotation.configure(5, 500, false);
        rotation.reset();
        assert_eq!(rotation.index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_total_wraps_index() {
        let rotation = ImageRotation::new();
        rotation.configure(5, 500, true);
        sleep(Duration::from_millis(1501)).await;
        assert_eq!(rotation.index(), 3);

        rotation.configure(2, 500, false);
        assert_eq!(rotation.index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_index_changes() {
        let rotation = ImageRotation::new();
        let mut rx = rotation.subscribe();
        rotation.configure(3, 500, false);
        rotation.reset();
        assert!(!rx.has_changed().unwrap());

        rotation.configure(3, 500, true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
