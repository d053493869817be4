//! Request lifecycle: `Idle → Dispatching → Streaming → {Completed, Stopped,
//! Failed} → Idle`. At most one request is in flight; a send while one is
//! active is rejected. Cancellation is cooperative and checked before every
//! timeline mutation so late-arriving chunks are discarded, never applied.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use parley_core::events::{ChunkEvent, Phase, SessionEvent};
use parley_core::ids::{ConversationId, MessageId};
use parley_core::timeline::Timeline;
use parley_core::transport::QueryTransport;
use parley_core::wire::QueryRequest;

use crate::correlate::DispatchCorrelator;
use crate::error::SessionError;
use crate::normalize::ChunkNormalizer;

/// System notice appended when the user cancels an in-flight request.
pub const STOPPED_NOTICE: &str = "Request stopped by user.";

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionConfig {
    /// Ask the backend for execution traces.
    pub verbose: bool,
}

/// Exists only while a request is in flight. Exactly one at a time.
struct RequestContext {
    user_message_id: MessageId,
    cancel: CancellationToken,
}

/// Owns the conversation timeline and the single active request.
pub struct SessionController {
    transport: Arc<dyn QueryTransport>,
    config: SessionConfig,
    timeline: Arc<Mutex<Timeline>>,
    conversation_id: Mutex<ConversationId>,
    phase: Arc<Mutex<Phase>>,
    active: Arc<Mutex<Option<RequestContext>>>,
    last_error: Arc<Mutex<Option<SessionError>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn QueryTransport>, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            config,
            timeline: Arc::new(Mutex::new(Timeline::new())),
            conversation_id: Mutex::new(ConversationId::new()),
            phase: Arc::new(Mutex::new(Phase::Idle)),
            active: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
            event_tx,
        }
    }

    /// Subscribe to session lifecycle events. The change-notification hook
    /// for presentation layers.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// The user message the in-flight request is answering, if any.
    pub fn active_user_message(&self) -> Option<MessageId> {
        self.active
            .lock()
            .as_ref()
            .map(|ctx| ctx.user_message_id.clone())
    }

    /// The error that failed the most recent request, if it failed. Cleared
    /// when the next request starts.
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error.lock().clone()
    }

    /// A point-in-time copy of the conversation state.
    pub fn snapshot(&self) -> Timeline {
        self.timeline.lock().clone()
    }

    pub(crate) fn timeline(&self) -> &Arc<Mutex<Timeline>> {
        &self.timeline
    }

    /// Mint a fresh conversation identifier so the backend starts without
    /// prior context bleed. Used by retry.
    pub fn reset_conversation(&self) -> ConversationId {
        let fresh = ConversationId::new();
        *self.conversation_id.lock() = fresh.clone();
        fresh
    }

    /// Dispatch a user query. Rejected with [`SessionError::Busy`] while a
    /// request is already in flight.
    #[instrument(skip(self, query), fields(conversation_id = %self.conversation_id()))]
    pub async fn send(&self, query: impl Into<String>) -> Result<MessageId, SessionError> {
        let query = query.into();
        let conversation_id = self.conversation_id();
        let cancel = CancellationToken::new();

        let user_message_id = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(SessionError::Busy);
            }
            let message = self.timeline.lock().append_user_message(&query);
            *active = Some(RequestContext {
                user_message_id: message.id.clone(),
                cancel: cancel.clone(),
            });
            message.id
        };
        *self.last_error.lock() = None;

        let _ = self.event_tx.send(SessionEvent::UserMessage {
            conversation_id: conversation_id.clone(),
            message_id: user_message_id.clone(),
            content: query.clone(),
        });
        set_phase(&self.phase, &self.event_tx, &conversation_id, Phase::Dispatching);

        let request = QueryRequest::new(query, conversation_id.clone(), self.config.verbose);
        let worker = RequestWorker {
            timeline: Arc::clone(&self.timeline),
            phase: Arc::clone(&self.phase),
            event_tx: self.event_tx.clone(),
            conversation_id,
            correlator: DispatchCorrelator::new(user_message_id.clone()),
            last_error: Arc::clone(&self.last_error),
            cancel,
        };
        let transport = Arc::clone(&self.transport);
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            let outcome = worker.consume(transport.as_ref(), &request).await;
            worker.finish(outcome);
            *active.lock() = None;
            worker.set_phase(Phase::Idle);
        });

        Ok(user_message_id)
    }

    /// Request cancellation of the in-flight request. Returns false when
    /// idle. Content already merged into the assistant message stays.
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(ctx) => {
                ctx.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

fn set_phase(
    slot: &Mutex<Phase>,
    event_tx: &broadcast::Sender<SessionEvent>,
    conversation_id: &ConversationId,
    phase: Phase,
) {
    *slot.lock() = phase;
    let _ = event_tx.send(SessionEvent::PhaseChanged {
        conversation_id: conversation_id.clone(),
        phase,
    });
}

enum Outcome {
    Completed,
    Stopped,
    Failed(SessionError),
}

/// Consumes one chunk stream and folds it into the timeline.
struct RequestWorker {
    timeline: Arc<Mutex<Timeline>>,
    phase: Arc<Mutex<Phase>>,
    event_tx: broadcast::Sender<SessionEvent>,
    conversation_id: ConversationId,
    correlator: DispatchCorrelator,
    last_error: Arc<Mutex<Option<SessionError>>>,
    cancel: CancellationToken,
}

impl RequestWorker {
    async fn consume(&self, transport: &dyn QueryTransport, request: &QueryRequest) -> Outcome {
        let mut stream = match transport.stream(request).await {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e.into()),
        };

        let mut normalizer = ChunkNormalizer::new();
        let mut streaming = false;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Stopped,
                next = stream.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Outcome::Failed(e.into()),
                None => return Outcome::Completed,
            };

            if !streaming {
                streaming = true;
                self.set_phase(Phase::Streaming);
            }

            for event in normalizer.normalize(&chunk) {
                // Events already in flight when cancellation landed are
                // discarded, not applied.
                if self.cancel.is_cancelled() {
                    return Outcome::Stopped;
                }
                if let Some(outcome) = self.apply(event) {
                    return outcome;
                }
            }
        }
    }

    fn apply(&self, event: ChunkEvent) -> Option<Outcome> {
        match event {
            ChunkEvent::ContentDelta { delta } => {
                self.timeline.lock().apply_content_delta(&delta);
                self.broadcast(SessionEvent::AssistantDelta {
                    conversation_id: self.conversation_id.clone(),
                    delta,
                });
            }
            ChunkEvent::FinalAnswer { text } => {
                self.timeline.lock().apply_final_answer(&text);
                self.broadcast(SessionEvent::AssistantFinal {
                    conversation_id: self.conversation_id.clone(),
                    content: text,
                });
            }
            ChunkEvent::TraceAppend { lines } => {
                self.timeline.lock().apply_trace_append(&lines);
            }
            ChunkEvent::Call { agent_id, query } => {
                let call = self.correlator.call(agent_id, query);
                let recorded = self.timeline.lock().record_call(
                    call.agent_id,
                    call.query,
                    call.user_message_id,
                );
                match recorded {
                    Ok(call) => self.broadcast(SessionEvent::AgentCalled {
                        conversation_id: self.conversation_id.clone(),
                        agent_id: call.agent_id,
                        query: call.query,
                    }),
                    Err(e) => tracing::warn!(error = %e, "Failed to record dispatch call"),
                }
            }
            ChunkEvent::Response { agent_id, response } => {
                let resp = self.correlator.response(agent_id, response);
                let recorded = self.timeline.lock().record_response(
                    resp.agent_id,
                    resp.response,
                    resp.user_message_id,
                );
                match recorded {
                    Ok(resp) => self.broadcast(SessionEvent::AgentResponded {
                        conversation_id: self.conversation_id.clone(),
                        agent_id: resp.agent_id,
                        response: resp.response,
                    }),
                    Err(e) => tracing::warn!(error = %e, "Failed to record dispatch response"),
                }
            }
            ChunkEvent::UpstreamError { message } => {
                return Some(Outcome::Failed(SessionError::Upstream(message)));
            }
        }
        None
    }

    fn finish(&self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.set_phase(Phase::Completed),
            Outcome::Stopped => {
                self.timeline.lock().append_system_message(STOPPED_NOTICE);
                self.broadcast(SessionEvent::SystemNotice {
                    conversation_id: self.conversation_id.clone(),
                    text: STOPPED_NOTICE.into(),
                });
                self.set_phase(Phase::Stopped);
            }
            Outcome::Failed(error) => {
                tracing::warn!(conversation_id = %self.conversation_id, error = %error, "Request failed");
                let text = error.to_string();
                self.timeline.lock().append_system_message(&text);
                self.broadcast(SessionEvent::SystemNotice {
                    conversation_id: self.conversation_id.clone(),
                    text,
                });
                *self.last_error.lock() = Some(error);
                self.set_phase(Phase::Failed);
            }
        }
        self.timeline.lock().end_request();
    }

    fn set_phase(&self, phase: Phase) {
        set_phase(&self.phase, &self.event_tx, &self.conversation_id, phase);
    }

    fn broadcast(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
