//! Narration pacing between segment deliveries
//!
//! After a segment is shown, the driver waits so the consumer can render or
//! speak it. Without speech synthesis the wait grows with segment length up
//! to a cap; with synthesis the narrator paces itself and a short fixed wait
//! is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Speech synthesis consumes segments; use `tts_delay_secs`
    pub tts_enabled: bool,
    pub base_delay_secs: f64,
    pub per_char_delay_secs: f64,
    pub max_delay_secs: f64,
    pub tts_delay_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tts_enabled: false,
            base_delay_secs: 0.5,
            per_char_delay_secs: 0.05,
            max_delay_secs: 3.0,
            tts_delay_secs: 0.1,
        }
    }
}

impl PacingConfig {
    /// Zero delay everywhere, for tests and headless consumers
    pub fn immediate() -> Self {
        Self {
            tts_enabled: false,
            base_delay_secs: 0.0,
            per_char_delay_secs: 0.0,
            max_delay_secs: 0.0,
            tts_delay_secs: 0.0,
        }
    }
}

/// Wait owed after delivering `segment_text`.
pub fn reading_delay(config: &PacingConfig, segment_text: &str) -> Duration {
    let secs = if config.tts_enabled {
        config.tts_delay_secs
    } else {
        let chars = segment_text.chars().count() as f64;
        (config.base_delay_secs + config.per_char_delay_secs * chars).min(config.max_delay_secs)
    };
    Duration::from_secs_f64(secs.max(0.0))
}
