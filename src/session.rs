//! Chat session: the turn driver
//!
//! A single state loop owns the [`StreamReassembler`]. Callers and transport
//! tasks talk to it through one command channel, so exactly one turn is
//! active at a time and every transition goes through the reducer.
//!
//! ```text
//! request() ──▶ ┌────────────┐ ──StartTransport──▶ transport task
//!               │ state loop │ ◀──Fragment/Complete/Fail──┘
//! stop()    ──▶ └────────────┘ ──Emit──▶ TurnHandle::segments ──▶ deliver()
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dialog::{ChannelId, DialogAggregator, DialogSink};
use crate::error::SessionError;
use crate::pacing::{reading_delay, PacingConfig};
use crate::settings::ChatSettings;
use crate::state_machine::{Effect, Event, Segment, StreamReassembler};
use crate::transcript_aggregator::TranscriptAggregator;
use crate::transport::ChatTransport;

const COMMAND_BUFFER: usize = 64;
const FRAGMENT_BUFFER: usize = 64;

/// Builds the display sink for a newly opened dialog channel
pub type SinkFactory = Arc<dyn Fn(&ChannelId) -> DialogSink + Send + Sync>;

/// One started turn: zero or more non-final segments, then one final.
///
/// The stream ends without a final segment only when the turn is cancelled
/// or superseded.
#[derive(Debug)]
pub struct TurnHandle {
    pub id: Uuid,
    pub segments: mpsc::UnboundedReceiver<Segment>,
}

enum Command {
    Request {
        content: String,
        reply: oneshot::Sender<TurnHandle>,
    },
    Event(Event),
    Shutdown,
}

pub struct ChatSession {
    tx: mpsc::Sender<Command>,
    activity: watch::Receiver<bool>,
    dialog: Arc<Mutex<DialogAggregator>>,
    transcript: Mutex<TranscriptAggregator>,
    sink_factory: Option<SinkFactory>,
    pacing: PacingConfig,
}

impl ChatSession {
    /// Start the session loop. Must be called from within a tokio runtime.
    pub fn new(settings: ChatSettings, transport: Arc<dyn ChatTransport>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (activity_tx, activity) = watch::channel(false);
        let dialog = Arc::new(Mutex::new(DialogAggregator::new()));
        let pacing = settings.pacing.clone();

        let state_loop = StateLoop {
            reassembler: StreamReassembler::new(settings.reassembler_config()),
            settings,
            transport,
            dialog: dialog.clone(),
            activity: activity_tx,
            tx: tx.clone(),
            current: None,
        };
        tokio::spawn(run_state_loop(state_loop, rx));

        Self {
            tx,
            activity,
            dialog,
            transcript: Mutex::new(TranscriptAggregator::new()),
            sink_factory: None,
            pacing,
        }
    }

    /// Open dialog channels with sinks from `factory` when the session needs them
    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = Some(factory);
        self
    }

    /// Start a turn for `user_text`, superseding any turn in flight.
    pub async fn request(&self, user_text: &str) -> Result<TurnHandle, SessionError> {
        {
            let mut dialog = self.dialog.lock().await;
            let created = match &self.sink_factory {
                Some(factory) => dialog.create_channel(
                    ChannelId::AssistantReply,
                    factory(&ChannelId::AssistantReply),
                    false,
                ),
                None => false,
            };
            if !created {
                dialog.reset_text(&ChannelId::AssistantReply);
            }
        }

        let (reply, handle) = oneshot::channel();
        self.send(Command::Request {
            content: user_text.to_string(),
            reply,
        })
        .await?;
        handle.await.map_err(|_| SessionError::Closed)
    }

    /// Abort the turn in flight without a final segment and clear every channel.
    pub async fn stop_generation(&self) -> Result<(), SessionError> {
        log::info!("Session: stop generation requested");
        self.transcript.lock().await.reset();
        self.send(Command::Event(Event::Cancel)).await
    }

    /// Display/narration of turn `id` has finished
    pub async fn playback_finished(&self, id: Uuid) -> Result<(), SessionError> {
        self.send(Command::Event(Event::PlaybackFinished { id })).await
    }

    /// Whether a turn is awaiting or draining its response
    pub fn is_turn_active(&self) -> bool {
        *self.activity.borrow()
    }

    pub fn subscribe_turn_activity(&self) -> watch::Receiver<bool> {
        self.activity.clone()
    }

    pub fn dialog(&self) -> Arc<Mutex<DialogAggregator>> {
        self.dialog.clone()
    }

    /// Feed one voice-recognition result.
    ///
    /// Ignored while a turn is active. Partial results update the user
    /// transcript channel; a complete result turns the accumulated utterance
    /// into a new turn.
    pub async fn voice_result(
        &self,
        text: &str,
        is_complete: bool,
    ) -> Result<Option<TurnHandle>, SessionError> {
        if self.is_turn_active() {
            log::debug!("Session: turn active, ignoring voice result");
            return Ok(None);
        }

        let mut transcript = self.transcript.lock().await;
        let accumulated = transcript.process_partial(text).map(str::to_string);

        if !is_complete {
            if let Some(accumulated) = accumulated {
                let mut dialog = self.dialog.lock().await;
                if !dialog.has_channel(&ChannelId::UserTranscript) {
                    if let Some(factory) = &self.sink_factory {
                        dialog.create_channel(
                            ChannelId::UserTranscript,
                            factory(&ChannelId::UserTranscript),
                            false,
                        );
                    }
                }
                dialog.update(&ChannelId::UserTranscript, &accumulated);
            }
            return Ok(None);
        }

        let Some(utterance) = transcript.finish() else {
            return Ok(None);
        };
        drop(transcript);

        {
            let mut dialog = self.dialog.lock().await;
            dialog.update(&ChannelId::UserTranscript, &utterance);
            // The next utterance opens a fresh transcript channel.
            dialog.clear(Some(&ChannelId::UserTranscript));
        }

        log::info!(
            "Session: voice utterance complete ({} chars), starting turn",
            utterance.chars().count()
        );
        self.request(&utterance).await.map(Some)
    }

    /// Show a turn on the assistant channel with pacing, then report playback
    /// finished. Returns the full reply text.
    pub async fn deliver(&self, mut turn: TurnHandle) -> Result<String, SessionError> {
        let reply = deliver_turn(&mut turn, &self.dialog, &self.pacing).await;
        self.playback_finished(turn.id).await?;
        Ok(reply)
    }

    /// Stop the session loop, aborting any turn in flight
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let _ = self.tx.try_send(Command::Shutdown);
    }
}

/// Push a turn's running reply into the assistant channel, one segment at a
/// time, waiting the reading delay after each.
pub async fn deliver_turn(
    turn: &mut TurnHandle,
    dialog: &Mutex<DialogAggregator>,
    pacing: &PacingConfig,
) -> String {
    let mut reply = String::new();

    while let Some(segment) = turn.segments.recv().await {
        if segment.is_error() {
            log::warn!("Session: turn {} ended with error: {}", turn.id, segment.text);
            // Keep the error apart from the partial reply already shown.
            if !reply.is_empty() {
                reply.push('\n');
            }
        }
        reply.push_str(&segment.text);
        dialog
            .lock()
            .await
            .update(&ChannelId::AssistantReply, &reply);

        let delay = reading_delay(pacing, &segment.text);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if segment.is_final {
            break;
        }
    }

    reply
}

struct ActiveTurn {
    id: Uuid,
    cancel: CancellationToken,
    segments: Option<mpsc::UnboundedSender<Segment>>,
}

struct StateLoop {
    reassembler: StreamReassembler,
    settings: ChatSettings,
    transport: Arc<dyn ChatTransport>,
    dialog: Arc<Mutex<DialogAggregator>>,
    activity: watch::Sender<bool>,
    tx: mpsc::Sender<Command>,
    current: Option<ActiveTurn>,
}

async fn run_state_loop(mut state_loop: StateLoop, mut rx: mpsc::Receiver<Command>) {
    log::info!("Session: state loop started");

    while let Some(command) = rx.recv().await {
        let mut reply = None;
        let event = match command {
            Command::Shutdown => {
                log::info!("Session: shutdown requested");
                break;
            }
            Command::Request { content, reply: r } => {
                reply = Some(r);
                Event::Request {
                    content,
                    model: state_loop.settings.model.clone(),
                    stream: state_loop.settings.stream,
                }
            }
            Command::Event(event) => event,
        };

        for effect in state_loop.reassembler.handle(event) {
            state_loop.execute(effect, &mut reply).await;
        }
    }

    if let Some(turn) = state_loop.current.take() {
        turn.cancel.cancel();
    }
    state_loop.activity.send_replace(false);
    log::info!("Session: state loop ended");
}

impl StateLoop {
    async fn execute(&mut self, effect: Effect, reply: &mut Option<oneshot::Sender<TurnHandle>>) {
        match effect {
            Effect::StartTransport { id, content } => {
                let cancel = CancellationToken::new();
                let (segments_tx, segments_rx) = mpsc::unbounded_channel();
                self.current = Some(ActiveTurn {
                    id,
                    cancel: cancel.clone(),
                    segments: Some(segments_tx),
                });
                if let Some(reply) = reply.take() {
                    let _ = reply.send(TurnHandle {
                        id,
                        segments: segments_rx,
                    });
                }
                self.spawn_transport(id, &content, cancel);
            }
            Effect::AbortTransport { id } => {
                if self.current.as_ref().is_some_and(|t| t.id == id) {
                    if let Some(turn) = self.current.take() {
                        log::info!("Session: aborting transport for turn {}", id);
                        turn.cancel.cancel();
                    }
                }
            }
            Effect::Emit(segment) => match &mut self.current {
                Some(turn) if turn.id == segment.turn_id => {
                    let is_final = segment.is_final;
                    if let Some(tx) = &turn.segments {
                        if tx.send(segment).is_err() {
                            log::debug!("Session: segment receiver for turn {} dropped", turn.id);
                        }
                    }
                    if is_final {
                        turn.segments = None;
                    }
                }
                _ => log::debug!("Session: no receiver for segment of turn {}", segment.turn_id),
            },
            Effect::ClearChannels => self.dialog.lock().await.clear_all(),
            Effect::ActivityChanged { active } => {
                self.activity.send_replace(active);
            }
        }
    }

    fn spawn_transport(&self, id: Uuid, content: &str, cancel: CancellationToken) {
        let request = self.settings.build_request(content);
        let transport = self.transport.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let (fragment_tx, mut fragment_rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);

            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(data) = fragment_rx.recv().await {
                    let event = Event::Fragment { id, data };
                    if forward_tx.send(Command::Event(event)).await.is_err() {
                        break;
                    }
                }
            });

            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = transport.send(request, fragment_tx) => Some(result),
            };

            let Some(result) = result else {
                log::debug!("Session: transport for turn {} cancelled", id);
                forwarder.abort();
                return;
            };

            // Every fragment is queued before the completion event.
            let _ = forwarder.await;
            let event = match result {
                Ok(()) => Event::TransportComplete { id },
                Err(error) => Event::TransportFail { id, error },
            };
            let _ = tx.send(Command::Event(event)).await;
        });
    }
}
