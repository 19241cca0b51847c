use std::time::Duration;

/// Synchronization engine configuration
///
/// Controls the debounce window for coalesced writes and how long the
/// "saved" indicator stays visible after the last operation settles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay after the last edit before a coalesced write fires.
    pub debounce_window: Duration,

    /// How long the saved indicator is shown before reverting to idle.
    pub saved_display_window: Duration,
}

impl SyncConfig {
    /// Default tuning for structured content (blocks, frames, form values).
    pub fn new() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            saved_display_window: Duration::from_millis(2500),
        }
    }

    /// Tuning for prose autosave, where a longer quiet period reads better.
    pub fn prose() -> Self {
        Self::new().debounce_window(Duration::from_millis(1500))
    }

    /// Set the debounce window
    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Set the saved-indicator display window
    pub fn saved_display_window(mut self, window: Duration) -> Self {
        self.saved_display_window = window;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.debounce_window.is_zero() {
            return Err("debounce_window must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
