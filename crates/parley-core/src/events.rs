use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ConversationId, MessageId};

/// Canonical events produced by normalizing wire chunks.
/// Transient — these drive timeline mutation and are not broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    ContentDelta { delta: String },
    FinalAnswer { text: String },
    Call { agent_id: AgentId, query: String },
    Response { agent_id: AgentId, response: String },
    TraceAppend { lines: Vec<String> },
    UpstreamError { message: String },
}

impl ChunkEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. } | Self::UpstreamError { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentDelta { .. } => "content_delta",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Call { .. } => "call",
            Self::Response { .. } => "response",
            Self::TraceAppend { .. } => "trace_append",
            Self::UpstreamError { .. } => "upstream_error",
        }
    }
}

/// Request lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Dispatching,
    Streaming,
    Completed,
    Stopped,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Session lifecycle events broadcast to presentation layers.
/// Subscribers re-render from the timeline when these arrive; the events
/// carry enough payload that a delta-printing UI never has to poll.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "phase_changed")]
    PhaseChanged {
        conversation_id: ConversationId,
        phase: Phase,
    },

    #[serde(rename = "user_message")]
    UserMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
    },

    #[serde(rename = "assistant_delta")]
    AssistantDelta {
        conversation_id: ConversationId,
        delta: String,
    },

    #[serde(rename = "assistant_final")]
    AssistantFinal {
        conversation_id: ConversationId,
        content: String,
    },

    #[serde(rename = "agent_called")]
    AgentCalled {
        conversation_id: ConversationId,
        agent_id: AgentId,
        query: String,
    },

    #[serde(rename = "agent_responded")]
    AgentResponded {
        conversation_id: ConversationId,
        agent_id: AgentId,
        response: String,
    },

    #[serde(rename = "system_notice")]
    SystemNotice {
        conversation_id: ConversationId,
        text: String,
    },
}

impl SessionEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::PhaseChanged { conversation_id, .. }
            | Self::UserMessage { conversation_id, .. }
            | Self::AssistantDelta { conversation_id, .. }
            | Self::AssistantFinal { conversation_id, .. }
            | Self::AgentCalled { conversation_id, .. }
            | Self::AgentResponded { conversation_id, .. }
            | Self::SystemNotice { conversation_id, .. } => conversation_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::UserMessage { .. } => "user_message",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::AssistantFinal { .. } => "assistant_final",
            Self::AgentCalled { .. } => "agent_called",
            Self::AgentResponded { .. } => "agent_responded",
            Self::SystemNotice { .. } => "system_notice",
        }
    }
}
