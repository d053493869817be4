use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

/// Body of a streaming query request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub conversation_id: ConversationId,
    pub stream: bool,
    pub verbose: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, conversation_id: ConversationId, verbose: bool) -> Self {
        Self {
            query: query.into(),
            conversation_id,
            stream: true,
            verbose,
        }
    }
}

/// One inbound event from the streaming backend.
///
/// The runtime emits loosely-shaped JSON objects: any subset of these fields
/// may be present on a single chunk, and the dispatch call/response fields
/// arrive in two different shapes depending on which code path produced them.
/// Unknown fields are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_call: Option<CallField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<ResponseField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_trace: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents_used: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A dispatch call, either `{"agent_id": ..., "query": ...}` or a bare
/// agent-id string (with the query in the chunk's `agent_query` field).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallField {
    Structured {
        agent_id: Option<String>,
        query: Option<String>,
    },
    Bare(String),
}

/// A dispatch response, either `{"agent_id": ..., "response": ...}` or a
/// bare response string.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseField {
    Structured {
        agent_id: Option<String>,
        response: Option<String>,
    },
    Bare(String),
}

// --- Convenience constructors ---

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn completed(full_answer: impl Into<String>) -> Self {
        Self {
            complete: Some(true),
            response: Some(full_answer.into()),
            ..Default::default()
        }
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn dispatch_call(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_call: Some(CallField::Structured {
                agent_id: Some(agent_id.into()),
                query: Some(query.into()),
            }),
            ..Default::default()
        }
    }

    pub fn dispatch_response(agent_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            agent_response: Some(ResponseField::Structured {
                agent_id: Some(agent_id.into()),
                response: Some(response.into()),
            }),
            ..Default::default()
        }
    }
}

/// One entry in the backend's agent directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_starters: Option<Vec<String>>,
    pub endpoint: String,
}

/// Response shape of the agent directory endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDirectory {
    pub agents: Vec<AgentInfo>,
}
