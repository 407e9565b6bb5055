//! Accumulation of partial voice-recognition results
//!
//! The recognizer reports overlapping partial results for one utterance.
//! They are folded into a single user utterance that is shown while the user
//! speaks and sent as the turn request once recognition completes.
//!
//! # Accumulation Strategy
//!
//! - **Partial**: appended unless already contained in the accumulated text
//! - **Complete**: the accumulated text becomes the utterance and the
//!   aggregator resets for the next one

/// Folds partial recognition results into one utterance
#[derive(Debug, Clone, Default)]
pub struct TranscriptAggregator {
    /// Accumulated utterance text
    accumulated: String,
    /// Count of partial results appended
    partial_count: u64,
    /// Count of partial results skipped as already contained
    skipped_count: u64,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a partial recognition result
    ///
    /// Returns the new accumulated text when `partial` was appended, `None`
    /// when it was empty or already contained.
    pub fn process_partial(&mut self, partial: &str) -> Option<&str> {
        if partial.is_empty() {
            return None;
        }

        if self.accumulated.contains(partial) {
            self.skipped_count += 1;
            log::debug!(
                "TranscriptAggregator: skipped repeated partial ({} chars)",
                partial.chars().count()
            );
            return None;
        }

        self.accumulated.push_str(partial);
        self.partial_count += 1;
        if self.partial_count % 10 == 0 {
            log::debug!(
                "TranscriptAggregator: {} partials, {} chars accumulated",
                self.partial_count,
                self.accumulated.len()
            );
        }
        Some(&self.accumulated)
    }

    /// Finish the utterance.
    ///
    /// Returns the accumulated text and resets, or `None` when nothing was
    /// recognized.
    pub fn finish(&mut self) -> Option<String> {
        if self.accumulated.is_empty() {
            log::info!("TranscriptAggregator: recognition completed without text");
            return None;
        }

        log::info!(
            "TranscriptAggregator: utterance complete, {} chars from {} partials ({} skipped)",
            self.accumulated.chars().count(),
            self.partial_count,
            self.skipped_count
        );
        let text = std::mem::take(&mut self.accumulated);
        self.reset();
        Some(text)
    }

    pub fn current_text(&self) -> &str {
        &self.accumulated
    }

    pub fn has_text(&self) -> bool {
        !self.accumulated.is_empty()
    }

    pub fn partial_count(&self) -> u64 {
        self.partial_count
    }

    /// Drop the utterance in progress
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.partial_count = 0;
        self.skipped_count = 0;
    }
}
