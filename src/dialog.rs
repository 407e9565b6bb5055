//! Per-channel dialog aggregation with duplicate suppression
//!
//! Each channel remembers the full text it last delivered. An update is
//! forwarded to the channel's sink only when it grows that text: empty text,
//! an exact repeat and a shorter rewrite are all dropped. This is the single
//! place where display dedup happens.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Window in which re-creating the same channel is suppressed
pub const CREATION_DEBOUNCE: Duration = Duration::from_millis(500);

/// Logical output channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    UserTranscript,
    AssistantReply,
    Custom(String),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::UserTranscript => write!(f, "user-transcript"),
            ChannelId::AssistantReply => write!(f, "assistant-reply"),
            ChannelId::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Display/narration callback receiving the channel's full accepted text
pub type DialogSink = Box<dyn FnMut(&str) + Send>;

struct Channel {
    sink: DialogSink,
    last_delivered: String,
}

/// Outcome of [`DialogAggregator::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Forwarded,
    Empty,
    Duplicate,
    Shrinking,
    /// Neither extends nor is contained in the last text
    NotIncremental,
    NoChannel,
}

impl UpdateOutcome {
    pub fn is_forwarded(self) -> bool {
        self == UpdateOutcome::Forwarded
    }
}

#[derive(Default)]
pub struct DialogAggregator {
    channels: HashMap<ChannelId, Channel>,
    last_created: Option<(ChannelId, Instant)>,
}

impl fmt::Debug for DialogAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogAggregator")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("last_created", &self.last_created)
            .finish()
    }
}

impl DialogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the sink for `id` and reset its last text.
    ///
    /// Re-creating the channel created last within [`CREATION_DEBOUNCE`] is
    /// ignored unless `is_welcome` is set. Returns whether the channel was
    /// (re)created.
    pub fn create_channel(&mut self, id: ChannelId, sink: DialogSink, is_welcome: bool) -> bool {
        self.create_channel_at(id, sink, is_welcome, Instant::now())
    }

    fn create_channel_at(
        &mut self,
        id: ChannelId,
        sink: DialogSink,
        is_welcome: bool,
        now: Instant,
    ) -> bool {
        if let Some((last_id, at)) = &self.last_created {
            let elapsed = now.saturating_duration_since(*at);
            if *last_id == id && elapsed < CREATION_DEBOUNCE && !is_welcome {
                log::debug!(
                    "DialogAggregator: skipped duplicate creation of {} after {:?}",
                    id,
                    elapsed
                );
                return false;
            }
        }

        if self.channels.contains_key(&id) {
            log::debug!("DialogAggregator: replacing existing channel {}", id);
        }
        log::info!(
            "DialogAggregator: created channel {}{}",
            id,
            if is_welcome { " (welcome)" } else { "" }
        );
        self.last_created = Some((id.clone(), now));
        self.channels.insert(
            id,
            Channel {
                sink,
                last_delivered: String::new(),
            },
        );
        true
    }

    /// Offer `text` as the channel's new full text.
    pub fn update(&mut self, id: &ChannelId, text: &str) -> UpdateOutcome {
        if text.is_empty() {
            log::debug!("DialogAggregator: ignored empty update for {}", id);
            return UpdateOutcome::Empty;
        }

        let Some(channel) = self.channels.get_mut(id) else {
            log::warn!("DialogAggregator: no active channel {}", id);
            return UpdateOutcome::NoChannel;
        };

        let last = &channel.last_delivered;
        if !last.is_empty() {
            if last == text {
                log::debug!("DialogAggregator: skipped duplicate update for {}", id);
                return UpdateOutcome::Duplicate;
            }
            if last.contains(text) {
                log::debug!(
                    "DialogAggregator: skipped shrinking update for {} ({} < {} chars)",
                    id,
                    text.chars().count(),
                    last.chars().count()
                );
                return UpdateOutcome::Shrinking;
            }
            if !text.contains(last.as_str()) {
                log::debug!(
                    "DialogAggregator: rejected non-incremental update for {}",
                    id
                );
                return UpdateOutcome::NotIncremental;
            }
        }

        (channel.sink)(text);
        channel.last_delivered = text.to_string();
        log::debug!(
            "DialogAggregator: forwarded {} chars to {}",
            text.chars().count(),
            id
        );
        UpdateOutcome::Forwarded
    }

    /// Reset one channel, or every channel when `id` is `None`.
    pub fn clear(&mut self, id: Option<&ChannelId>) {
        match id {
            Some(id) => {
                if self.channels.remove(id).is_some() {
                    log::debug!("DialogAggregator: cleared channel {}", id);
                }
            }
            None => self.clear_all(),
        }
    }

    pub fn clear_all(&mut self) {
        if !self.channels.is_empty() {
            log::info!("DialogAggregator: cleared {} channels", self.channels.len());
        }
        self.channels.clear();
        self.last_created = None;
    }

    /// Forget the channel's last text but keep its sink
    pub fn reset_text(&mut self, id: &ChannelId) {
        if let Some(channel) = self.channels.get_mut(id) {
            channel.last_delivered.clear();
        }
    }

    pub fn has_channel(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    /// Text last forwarded on `id`
    pub fn last_text(&self, id: &ChannelId) -> Option<&str> {
        self.channels.get(id).map(|c| c.last_delivered.as_str())
    }
}
