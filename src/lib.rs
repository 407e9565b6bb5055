//! Streaming chat-completion reply reassembly for voice assistants.
//!
//! Raw response fragments (SSE frames or a buffered JSON body) are decoded,
//! stripped of `<think>` spans, cut into punctuation-aligned segments and
//! delivered once per turn with exactly one final segment. A dialog layer
//! above forwards only growing text to display/narration sinks.

pub mod decoder;
pub mod dialog;
pub mod error;
pub mod logging;
pub mod pacing;
pub mod protocol;
pub mod segmenter;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod think_filter;
pub mod transcript_aggregator;
pub mod transport;

pub use dialog::{ChannelId, DialogAggregator, DialogSink, UpdateOutcome};
pub use error::{DecodeError, ReplyErrorKind, SessionError, SettingsError, TransportError};
pub use session::{deliver_turn, ChatSession, SinkFactory, TurnHandle};
pub use settings::ChatSettings;
pub use state_machine::{Segment, StreamReassembler};
pub use transport::{ChatTransport, FragmentSender, HttpTransport};
