use std::time::{Duration, Instant};
use tracing::info;

/// How long an error summary replaces the regular status.
pub const ERROR_DISPLAY: Duration = Duration::from_secs(5);

pub const NO_TRACK: &str = "No track playing";

/// The single human-readable line the UI shell renders.  Changes are logged.
#[derive(Debug)]
pub struct StatusLine {
    text: String,
    flash: Option<(String, Instant)>,
}

impl StatusLine {
    pub fn new() -> Self {
        Self {
            text: NO_TRACK.to_string(),
            flash: None,
        }
    }

    pub fn set(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            info!("status: {}", text);
            self.text = text;
        }
    }

    /// Show `message` instead of the status for `ERROR_DISPLAY`.
    pub fn flash_error(&mut self, message: impl Into<String>, now: Instant) {
        let message = message.into();
        info!("status: error: {}", message);
        self.flash = Some((message, now + ERROR_DISPLAY));
    }

    pub fn display(&self, now: Instant) -> &str {
        match &self.flash {
            Some((message, until)) if now < *until => message,
            _ => &self.text,
        }
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}
