//! Ordered conversation state: messages, dispatch calls, dispatch responses.
//!
//! The timeline is append-only except for two sanctioned mutations: in-place
//! content updates of the assistant message belonging to the active request,
//! and bulk truncation by retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TimelineError;
use crate::ids::{AgentId, CallId, MessageId, ResponseId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_trace: Option<Vec<String>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            agent_id: None,
            execution_trace: None,
        }
    }
}

/// A sub-agent invocation reported inline in the stream. Immutable once
/// recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentCall {
    pub id: CallId,
    pub agent_id: AgentId,
    pub query: String,
    pub user_message_id: MessageId,
}

/// A sub-agent's result. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: ResponseId,
    pub agent_id: AgentId,
    pub response: String,
    pub user_message_id: MessageId,
}

/// A call grouped with the responses that share its agent id.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub call: AgentCall,
    pub responses: Vec<AgentResponse>,
}

/// Presentation read model: one user message with everything that answered it.
#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub user: Message,
    pub replies: Vec<Message>,
    pub dispatches: Vec<Dispatch>,
    pub unpaired: Vec<AgentResponse>,
}

/// The mutable conversation state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Timeline {
    messages: Vec<Message>,
    calls: Vec<AgentCall>,
    responses: Vec<AgentResponse>,
    active_assistant: Option<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn calls(&self) -> &[AgentCall] {
        &self.calls
    }

    pub fn responses(&self) -> &[AgentResponse] {
        &self.responses
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Append a user message at the tail. Always succeeds.
    pub fn append_user_message(&mut self, content: impl Into<String>) -> Message {
        let message = Message::user(content);
        self.messages.push(message.clone());
        message
    }

    /// Append a system message at the tail. Always succeeds.
    pub fn append_system_message(&mut self, content: impl Into<String>) -> Message {
        let message = Message::system(content);
        self.messages.push(message.clone());
        message
    }

    /// Append delta text to the active assistant message, creating it if the
    /// tail does not belong to the active request.
    pub fn apply_content_delta(&mut self, delta: &str) {
        let target = self.active_assistant_mut();
        target.content.push_str(delta);
    }

    /// Replace the active assistant message's content wholesale. Supersedes
    /// prior deltas rather than appending to them.
    pub fn apply_final_answer(&mut self, text: &str) {
        let target = self.active_assistant_mut();
        target.content = text.to_string();
    }

    /// Extend the active assistant message's execution trace.
    pub fn apply_trace_append(&mut self, lines: &[String]) {
        let target = self.active_assistant_mut();
        target
            .execution_trace
            .get_or_insert_with(Vec::new)
            .extend_from_slice(lines);
    }

    /// Mark the end of the in-flight request. Subsequent deltas open a fresh
    /// assistant message.
    pub fn end_request(&mut self) {
        self.active_assistant = None;
    }

    pub fn has_active_assistant(&self) -> bool {
        self.active_assistant.is_some()
    }

    fn active_assistant_mut(&mut self) -> &mut Message {
        let tail_is_active = match (&self.active_assistant, self.messages.last()) {
            (Some(active), Some(tail)) => &tail.id == active,
            _ => false,
        };
        if !tail_is_active {
            let message = Message::assistant("");
            self.active_assistant = Some(message.id.clone());
            self.messages.push(message);
        }
        // Just pushed or verified: the tail is the active assistant.
        self.messages.last_mut().unwrap()
    }

    /// Record a dispatch call correlated to a user message.
    pub fn record_call(
        &mut self,
        agent_id: AgentId,
        query: impl Into<String>,
        user_message_id: MessageId,
    ) -> Result<AgentCall, TimelineError> {
        self.require_user_message(&user_message_id)?;
        let call = AgentCall {
            id: CallId::new(),
            agent_id,
            query: query.into(),
            user_message_id,
        };
        self.calls.push(call.clone());
        Ok(call)
    }

    /// Record a dispatch response correlated to a user message.
    pub fn record_response(
        &mut self,
        agent_id: AgentId,
        response: impl Into<String>,
        user_message_id: MessageId,
    ) -> Result<AgentResponse, TimelineError> {
        self.require_user_message(&user_message_id)?;
        let resp = AgentResponse {
            id: ResponseId::new(),
            agent_id,
            response: response.into(),
            user_message_id,
        };
        self.responses.push(resp.clone());
        Ok(resp)
    }

    fn require_user_message(&self, id: &MessageId) -> Result<(), TimelineError> {
        match self.message(id) {
            Some(m) if m.role == Role::User => Ok(()),
            Some(_) => Err(TimelineError::NotUserMessage(id.to_string())),
            None => Err(TimelineError::NotFound(id.to_string())),
        }
    }

    /// Remove `message_id` and every later message, plus every call/response
    /// whose correlated user message is no longer present.
    pub fn truncate_from(&mut self, message_id: &MessageId) -> Result<(), TimelineError> {
        let pos = self
            .messages
            .iter()
            .position(|m| &m.id == message_id)
            .ok_or_else(|| TimelineError::NotFound(message_id.to_string()))?;

        self.messages.truncate(pos);

        let remaining: std::collections::HashSet<&MessageId> =
            self.messages.iter().map(|m| &m.id).collect();
        self.calls.retain(|c| remaining.contains(&c.user_message_id));
        self.responses.retain(|r| remaining.contains(&r.user_message_id));

        if let Some(active) = &self.active_assistant {
            if !remaining.contains(active) {
                self.active_assistant = None;
            }
        }
        Ok(())
    }

    /// Group the timeline for rendering: each user message in order with its
    /// following assistant/system messages and correlated dispatches. Calls
    /// keep arrival order. Responses pair by agent id, spreading across
    /// same-agent calls in arrival order (the first response to the first
    /// such call and so on, extras staying with the last); responses
    /// matching no call trail after the paired entries.
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::User => exchanges.push(Exchange {
                    user: message.clone(),
                    replies: Vec::new(),
                    dispatches: Vec::new(),
                    unpaired: Vec::new(),
                }),
                _ => {
                    if let Some(current) = exchanges.last_mut() {
                        current.replies.push(message.clone());
                    }
                }
            }
        }

        for exchange in &mut exchanges {
            exchange.dispatches = self
                .calls
                .iter()
                .filter(|c| c.user_message_id == exchange.user.id)
                .map(|call| Dispatch {
                    call: call.clone(),
                    responses: Vec::new(),
                })
                .collect();

            for response in self
                .responses
                .iter()
                .filter(|r| r.user_message_id == exchange.user.id)
            {
                // First same-agent call still waiting for a response, else
                // the last same-agent call takes the extras.
                let mut target = None;
                for (i, dispatch) in exchange.dispatches.iter().enumerate() {
                    if dispatch.call.agent_id == response.agent_id {
                        target = Some(i);
                        if dispatch.responses.is_empty() {
                            break;
                        }
                    }
                }
                match target {
                    Some(i) => exchange.dispatches[i].responses.push(response.clone()),
                    None => exchange.unpaired.push(response.clone()),
                }
            }
        }

        exchanges
    }
}
