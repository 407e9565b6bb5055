//! Turn state machine for streaming reply reassembly
//!
//! This module implements the reassembler using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute.
//!
//! ```text
//! Idle ──Request──▶ Awaiting ──first delta──▶ Draining ──[DONE]/complete──▶ Done
//!                      │                          │
//!                      └──── transport failure ───┴──────────────────────▶ Done
//! ```
//!
//! Every turn that reaches `Done` through the stream emits exactly one final
//! segment. Cancellation reaches `Done` without one.

use std::time::Instant;
use uuid::Uuid;

use crate::decoder::PayloadDecoder;
use crate::error::{DecodeError, ReplyErrorKind, TransportError};
use crate::segmenter::{self, BOUNDARY_CHARS, MAX_SEGMENT_CHARS};
use crate::think_filter::{self, StreamingFilter};

/// Reply used when a turn ends without any visible content
pub const DEFAULT_FALLBACK_REPLY: &str = "Hello! How can I help you?";

/// A bounded, filtered piece of reply text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub turn_id: Uuid,
    pub text: String,
    pub is_final: bool,
    /// Set when `text` is an error message rather than reply content
    pub error: Option<ReplyErrorKind>,
}

impl Segment {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-turn data owned by the active state
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: Uuid,
    pub model: String,
    /// Streaming request. A non-streaming turn completes on its unframed body.
    pub stream: bool,
    /// Decoded text not yet cut into a segment
    pub buffer: String,
    /// Segments already emitted for this turn, in order
    pub emitted: Vec<String>,
    /// Think-span state carried across deltas
    pub think: StreamingFilter,
    pub started_at: Instant,
}

impl Turn {
    fn new(model: String, stream: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            stream,
            buffer: String::new(),
            emitted: Vec::new(),
            think: StreamingFilter::new(),
            started_at: Instant::now(),
        }
    }

    /// All text emitted so far, in order
    pub fn emitted_text(&self) -> String {
        self.emitted.concat()
    }
}

/// How a turn reached `Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Internal state of the reassembler.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    Awaiting {
        turn: Turn,
    },
    Draining {
        turn: Turn,
    },
    Done {
        turn_id: Uuid,
        outcome: TurnOutcome,
    },
}

impl State {
    /// Id of the turn this state belongs to, if any
    pub fn turn_id(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Awaiting { turn } | State::Draining { turn } => Some(turn.id),
            State::Done { turn_id, .. } => Some(*turn_id),
        }
    }

    /// Whether a transport call is in flight for this state
    pub fn is_active(&self) -> bool {
        matches!(self, State::Awaiting { .. } | State::Draining { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::Awaiting { .. } => "Awaiting",
            State::Draining { .. } => "Draining",
            State::Done { .. } => "Done",
        }
    }
}

/// Events that can trigger state transitions.
/// They come from the session (requests, cancel, playback) and from the
/// transport task (fragments, completion, failure).
#[derive(Debug, Clone)]
pub enum Event {
    /// A finalized user utterance starts a new turn
    Request {
        content: String,
        model: String,
        stream: bool,
    },
    /// One raw fragment delivered by the transport
    Fragment { id: Uuid, data: String },
    /// The transport finished delivering the response
    TransportComplete { id: Uuid },
    /// The transport failed (connection, status, missing key)
    TransportFail { id: Uuid, error: TransportError },
    /// "Stop generation": abort without a synthetic final segment
    Cancel,
    /// Display/narration of the turn finished
    PlaybackFinished { id: Uuid },
}

/// Effects to be executed after a state transition.
/// The session loop handles these.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartTransport { id: Uuid, content: String },
    AbortTransport { id: Uuid },
    Emit(Segment),
    /// Reset every dialog channel
    ClearChannels,
    /// Turn activity changed (replaces a global "response in progress" flag)
    ActivityChanged { active: bool },
}

/// Static knobs of the reassembler
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    pub decoder: PayloadDecoder,
    pub fallback_reply: String,
    pub max_segment_chars: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            decoder: PayloadDecoder::default(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            max_segment_chars: MAX_SEGMENT_CHARS,
        }
    }
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale turn IDs
/// - `Done` accepts nothing from the transport
pub fn reduce(config: &ReassemblerConfig, state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.turn_id();
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // New turn (from any state; an in-flight turn is aborted first)
        // -----------------
        (
            _,
            Request {
                content,
                model,
                stream,
            },
        ) => {
            let mut effects = Vec::new();
            if let Awaiting { turn } | Draining { turn } = state {
                log::info!("Reassembler: new request supersedes turn {}", turn.id);
                effects.push(AbortTransport { id: turn.id });
            }
            let turn = Turn::new(model, stream);
            effects.push(StartTransport {
                id: turn.id,
                content,
            });
            effects.push(ActivityChanged { active: true });
            (Awaiting { turn }, effects)
        }

        // -----------------
        // Awaiting / Draining
        // -----------------
        (Awaiting { turn } | Draining { turn }, Fragment { id, data }) if turn.id == id => {
            on_fragment(config, state, turn.clone(), &data)
        }
        (Awaiting { turn } | Draining { turn }, TransportComplete { id }) if turn.id == id => {
            let mut turn = turn.clone();
            let mut effects = Vec::new();
            finish(config, &mut turn, &mut effects);
            (
                Done {
                    turn_id: turn.id,
                    outcome: TurnOutcome::Completed,
                },
                effects,
            )
        }
        (Awaiting { turn } | Draining { turn }, TransportFail { id, error }) if turn.id == id => {
            log::error!("Reassembler: turn {} transport failed: {}", turn.id, error);
            fail(turn, error.to_string(), ReplyErrorKind::Transport)
        }
        (Awaiting { turn } | Draining { turn }, Cancel) => {
            log::info!(
                "Reassembler: turn {} cancelled after {} segments",
                turn.id,
                turn.emitted.len()
            );
            (
                Done {
                    turn_id: turn.id,
                    outcome: TurnOutcome::Cancelled,
                },
                vec![
                    AbortTransport { id: turn.id },
                    ClearChannels,
                    ActivityChanged { active: false },
                ],
            )
        }

        // -----------------
        // Done
        // -----------------
        (Done { turn_id, .. }, Fragment { id, data }) if *turn_id == id => {
            log::warn!(
                "Reassembler: turn {} is done, discarding fragment ({} bytes)",
                turn_id,
                data.len()
            );
            (state.clone(), vec![])
        }
        (Done { turn_id, .. }, TransportFail { id, error }) if *turn_id == id => {
            log::warn!(
                "Reassembler: turn {} is done, discarding transport failure: {}",
                turn_id,
                error
            );
            (state.clone(), vec![])
        }
        (Done { turn_id, .. }, PlaybackFinished { id }) if *turn_id == id => (Idle, vec![]),
        (Done { .. }, Cancel) => (state.clone(), vec![ClearChannels]),
        (Idle, Cancel) => (Idle, vec![ClearChannels]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, Fragment { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TransportComplete { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TransportFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, PlaybackFinished { id }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

fn on_fragment(
    config: &ReassemblerConfig,
    state: &State,
    mut turn: Turn,
    data: &str,
) -> (State, Vec<Effect>) {
    let decoded = match config.decoder.decode(data, &turn.model) {
        Ok(decoded) => decoded,
        Err(DecodeError::Upstream(message)) => {
            let text = DecodeError::Upstream(message).to_string();
            let (next, mut effects) = fail(&turn, text, ReplyErrorKind::Upstream);
            effects.push(Effect::AbortTransport { id: turn.id });
            return (next, effects);
        }
        Err(err @ DecodeError::Malformed(_)) => {
            log::warn!("Reassembler: skipping fragment: {}", err);
            return (state.clone(), vec![]);
        }
    };

    if decoded.malformed > 0 {
        log::warn!(
            "Reassembler: turn {} skipped {} malformed sub-documents",
            turn.id,
            decoded.malformed
        );
    }

    let mut effects = Vec::new();
    for delta in &decoded.deltas {
        let visible = turn.think.push(delta);
        turn.buffer.push_str(&visible);
    }
    drain_closed(config, &mut turn, &mut effects);

    let whole_body = !turn.stream && !data.trim_start().starts_with("data:");
    if whole_body {
        log::debug!("Reassembler: turn {} non-streaming body received", turn.id);
    }

    if decoded.stream_end || whole_body {
        finish(config, &mut turn, &mut effects);
        return (
            State::Done {
                turn_id: turn.id,
                outcome: TurnOutcome::Completed,
            },
            effects,
        );
    }

    let next = match state {
        State::Awaiting { .. } if !decoded.has_content() => State::Awaiting { turn },
        _ => State::Draining { turn },
    };
    (next, effects)
}

/// Cut every closed chunk off the front of the buffer and emit it.
fn drain_closed(config: &ReassemblerConfig, turn: &mut Turn, effects: &mut Vec<Effect>) {
    let split = segmenter::split_closed(&turn.buffer, BOUNDARY_CHARS, config.max_segment_chars);
    if split.closed.is_empty() {
        return;
    }

    let consumed: usize = split.closed.iter().map(|c| c.len()).sum();
    // Only a chunk that lost a think span may vanish; whitespace is kept.
    let chunks: Vec<String> = split
        .closed
        .iter()
        .filter_map(|chunk| {
            if !think_filter::has_think_tag(chunk) {
                return Some(chunk.to_string());
            }
            Some(think_filter::filter(chunk)).filter(|t| !t.is_empty())
        })
        .collect();
    turn.buffer.replace_range(..consumed, "");

    for text in chunks {
        emit(turn, text, false, None, effects);
    }
}

/// Flush the buffer as the final segment, substituting the fallback reply
/// when the turn produced nothing visible.
fn finish(config: &ReassemblerConfig, turn: &mut Turn, effects: &mut Vec<Effect>) {
    let tail = turn.think.flush();
    turn.buffer.push_str(&tail);
    let remainder = think_filter::filter(&std::mem::take(&mut turn.buffer));
    let text = if turn.emitted.is_empty() && remainder.trim().is_empty() {
        log::info!(
            "Reassembler: turn {} produced no visible content, sending fallback reply",
            turn.id
        );
        config.fallback_reply.clone()
    } else {
        remainder
    };

    emit(turn, text, true, None, effects);
    effects.push(Effect::ActivityChanged { active: false });
    log::info!(
        "Reassembler: turn {} completed with {} segments in {:?}",
        turn.id,
        turn.emitted.len(),
        turn.started_at.elapsed()
    );
}

fn fail(turn: &Turn, text: String, kind: ReplyErrorKind) -> (State, Vec<Effect>) {
    let mut turn = turn.clone();
    let mut effects = Vec::new();
    emit(&mut turn, text, true, Some(kind), &mut effects);
    effects.push(Effect::ActivityChanged { active: false });
    (
        State::Done {
            turn_id: turn.id,
            outcome: TurnOutcome::Failed,
        },
        effects,
    )
}

fn emit(
    turn: &mut Turn,
    text: String,
    is_final: bool,
    error: Option<ReplyErrorKind>,
    effects: &mut Vec<Effect>,
) {
    if turn.emitted.is_empty() {
        log::debug!(
            "Reassembler: turn {} first segment after {:?}",
            turn.id,
            turn.started_at.elapsed()
        );
    }
    log::debug!(
        "Reassembler: emit segment #{} (final={}, {} chars)",
        turn.emitted.len() + 1,
        is_final,
        text.chars().count()
    );
    turn.emitted.push(text.clone());
    effects.push(Effect::Emit(Segment {
        turn_id: turn.id,
        text,
        is_final,
        error,
    }));
}

/// Owns the reducer state and applies events in order.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    config: ReassemblerConfig,
    state: State,
}

impl StreamReassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            state: State::Idle,
        }
    }

    /// Apply one event and return the effects to execute
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let before = self.state.name();
        let (next, effects) = reduce(&self.config, &self.state, event);
        if before != next.name() {
            log::info!("Reassembler: state transition {} -> {}", before, next.name());
        }
        self.state = next;
        effects
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Whether a turn is currently awaiting or draining
    pub fn is_turn_active(&self) -> bool {
        self.state.is_active()
    }
}
