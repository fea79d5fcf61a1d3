//! Desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Tell the user about something that degraded silently (missing speech
    /// model, missing image key, empty search result).
    pub fn notify(&self, summary: &str, body: &str) {
        if !self.enabled {
            debug!("Notice (suppressed): {summary}: {body}");
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("audio-speakers")
            .timeout(4000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
