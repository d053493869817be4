//! Wire-shape normalization. Runs once at the boundary so the rest of the
//! session layer only ever sees canonical [`ChunkEvent`]s.

use parley_core::events::ChunkEvent;
use parley_core::ids::AgentId;
use parley_core::wire::{CallField, ResponseField, StreamChunk};

/// Sentinel agent id for responses that cannot be attributed.
pub const UNKNOWN_AGENT: &str = "unknown-agent";

/// Maps one inbound chunk to zero or more canonical events.
///
/// Stateful only in the agent id of the most recent dispatch call, which is
/// the fallback attribution for bare response strings. One normalizer
/// instance lives per request.
#[derive(Default)]
pub struct ChunkNormalizer {
    last_call_agent: Option<AgentId>,
}

impl ChunkNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, chunk: &StreamChunk) -> Vec<ChunkEvent> {
        // 1. An explicit error suppresses every other field on the chunk.
        if let Some(message) = &chunk.error {
            return vec![ChunkEvent::UpstreamError {
                message: message.clone(),
            }];
        }

        let mut events = Vec::new();

        // 2. Traces co-occur with other emissions.
        if let Some(lines) = &chunk.execution_trace {
            if !lines.is_empty() {
                events.push(ChunkEvent::TraceAppend {
                    lines: lines.clone(),
                });
            }
        }

        // 3. Dispatch call, structured or bare.
        if let Some(call) = &chunk.agent_call {
            if let Some(event) = self.normalize_call(call, chunk) {
                events.push(event);
            }
        }

        // 4. Dispatch response, structured or bare.
        if let Some(resp) = &chunk.agent_response {
            if let Some(event) = self.normalize_response(resp, chunk) {
                events.push(event);
            }
        }

        // 5. A completion with a full answer supersedes content on the same
        //    chunk; otherwise content is a delta.
        if chunk.complete == Some(true) && chunk.response.is_some() {
            if let Some(text) = &chunk.response {
                events.push(ChunkEvent::FinalAnswer { text: text.clone() });
            }
        } else if let Some(delta) = &chunk.content {
            events.push(ChunkEvent::ContentDelta {
                delta: delta.clone(),
            });
        }

        events
    }

    fn normalize_call(&mut self, call: &CallField, chunk: &StreamChunk) -> Option<ChunkEvent> {
        let (agent_id, query) = match call {
            CallField::Structured { agent_id, query } => (
                agent_id.clone(),
                query.clone().or_else(|| chunk.agent_query.clone()),
            ),
            CallField::Bare(id) => (Some(id.clone()), chunk.agent_query.clone()),
        };

        let agent_id = match agent_id.filter(|id| !id.is_empty()) {
            Some(id) => AgentId::from_raw(id),
            None => {
                tracing::warn!(chunk = ?chunk, "Dropping dispatch call without agent id");
                return None;
            }
        };

        let query = query
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| format!("Query to {agent_id}"));

        self.last_call_agent = Some(agent_id.clone());
        Some(ChunkEvent::Call { agent_id, query })
    }

    fn normalize_response(&self, resp: &ResponseField, chunk: &StreamChunk) -> Option<ChunkEvent> {
        let (explicit_agent, response) = match resp {
            ResponseField::Structured { agent_id, response } => {
                (agent_id.clone(), response.clone())
            }
            ResponseField::Bare(text) => (None, Some(text.clone())),
        };

        let Some(response) = response else {
            tracing::warn!(chunk = ?chunk, "Dropping dispatch response without response text");
            return None;
        };

        // Attribution fallback chain: explicit id on the response, the
        // chunk's own agent_id, the most recent call, then the sentinel.
        let agent_id = explicit_agent
            .filter(|id| !id.is_empty())
            .or_else(|| chunk.agent_id.clone().filter(|id| !id.is_empty()))
            .map(AgentId::from_raw)
            .or_else(|| self.last_call_agent.clone())
            .unwrap_or_else(|| AgentId::from_raw(UNKNOWN_AGENT));

        Some(ChunkEvent::Response { agent_id, response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::wire::StreamChunk;

    fn normalize_one(chunk: StreamChunk) -> Vec<ChunkEvent> {
        ChunkNormalizer::new().normalize(&chunk)
    }

    #[test]
    fn content_emits_delta() {
        let events = normalize_one(StreamChunk::delta("Hi"));
        assert_eq!(events, vec![ChunkEvent::ContentDelta { delta: "Hi".into() }]);
    }

    #[test]
    fn error_suppresses_everything_else() {
        let mut chunk = StreamChunk::completed("final");
        chunk.content = Some("partial".into());
        chunk.error = Some("backend exploded".into());
        chunk.execution_trace = Some(vec!["step".into()]);

        let events = normalize_one(chunk);
        assert_eq!(
            events,
            vec![ChunkEvent::UpstreamError { message: "backend exploded".into() }]
        );
    }

    #[test]
    fn completion_supersedes_content_on_same_chunk() {
        let mut chunk = StreamChunk::completed("Hi there!");
        chunk.content = Some(" there".into());

        let events = normalize_one(chunk);
        assert_eq!(events, vec![ChunkEvent::FinalAnswer { text: "Hi there!".into() }]);
    }

    #[test]
    fn completion_without_content_still_final() {
        let events = normalize_one(StreamChunk::completed("The answer is 4"));
        assert_eq!(
            events,
            vec![ChunkEvent::FinalAnswer { text: "The answer is 4".into() }]
        );
    }

    #[test]
    fn complete_flag_without_response_is_delta() {
        let mut chunk = StreamChunk::delta("tail");
        chunk.complete = Some(true);

        let events = normalize_one(chunk);
        assert_eq!(events, vec![ChunkEvent::ContentDelta { delta: "tail".into() }]);
    }

    #[test]
    fn status_only_chunk_emits_nothing() {
        let chunk = StreamChunk {
            status: Some("processing".into()),
            ..Default::default()
        };
        assert!(normalize_one(chunk).is_empty());
    }

    #[test]
    fn structured_and_bare_calls_normalize_identically() {
        let structured = normalize_one(StreamChunk::dispatch_call("math-agent", "2+2"));

        let bare = normalize_one(StreamChunk {
            agent_call: Some(CallField::Bare("math-agent".into())),
            agent_query: Some("2+2".into()),
            ..Default::default()
        });

        assert_eq!(structured, bare);
        assert_eq!(
            structured,
            vec![ChunkEvent::Call {
                agent_id: AgentId::from_raw("math-agent"),
                query: "2+2".into(),
            }]
        );
    }

    #[test]
    fn bare_call_without_query_gets_placeholder() {
        let events = normalize_one(StreamChunk {
            agent_call: Some(CallField::Bare("hello-agent".into())),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![ChunkEvent::Call {
                agent_id: AgentId::from_raw("hello-agent"),
                query: "Query to hello-agent".into(),
            }]
        );
    }

    #[test]
    fn structured_call_takes_query_from_neighbor_field() {
        let events = normalize_one(StreamChunk {
            agent_call: Some(CallField::Structured {
                agent_id: Some("math-agent".into()),
                query: None,
            }),
            agent_query: Some("7*6".into()),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![ChunkEvent::Call {
                agent_id: AgentId::from_raw("math-agent"),
                query: "7*6".into(),
            }]
        );
    }

    #[test]
    fn call_without_agent_id_dropped() {
        let events = normalize_one(StreamChunk {
            agent_call: Some(CallField::Structured {
                agent_id: None,
                query: Some("orphan".into()),
            }),
            ..Default::default()
        });
        assert!(events.is_empty());

        let events = normalize_one(StreamChunk {
            agent_call: Some(CallField::Bare(String::new())),
            ..Default::default()
        });
        assert!(events.is_empty());
    }

    #[test]
    fn structured_response() {
        let events = normalize_one(StreamChunk::dispatch_response("math-agent", "4"));
        assert_eq!(
            events,
            vec![ChunkEvent::Response {
                agent_id: AgentId::from_raw("math-agent"),
                response: "4".into(),
            }]
        );
    }

    #[test]
    fn bare_response_uses_chunk_agent_id() {
        let events = normalize_one(StreamChunk {
            agent_response: Some(ResponseField::Bare("4".into())),
            agent_id: Some("math-agent".into()),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![ChunkEvent::Response {
                agent_id: AgentId::from_raw("math-agent"),
                response: "4".into(),
            }]
        );
    }

    #[test]
    fn bare_response_falls_back_to_last_call() {
        let mut normalizer = ChunkNormalizer::new();
        normalizer.normalize(&StreamChunk::dispatch_call("math-agent", "2+2"));

        let events = normalizer.normalize(&StreamChunk {
            agent_response: Some(ResponseField::Bare("4".into())),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![ChunkEvent::Response {
                agent_id: AgentId::from_raw("math-agent"),
                response: "4".into(),
            }]
        );
    }

    #[test]
    fn bare_response_without_any_attribution_is_unknown_agent() {
        let events = normalize_one(StreamChunk {
            agent_response: Some(ResponseField::Bare("42".into())),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![ChunkEvent::Response {
                agent_id: AgentId::from_raw(UNKNOWN_AGENT),
                response: "42".into(),
            }]
        );
    }

    #[test]
    fn structured_response_without_text_dropped() {
        let events = normalize_one(StreamChunk {
            agent_response: Some(ResponseField::Structured {
                agent_id: Some("math-agent".into()),
                response: None,
            }),
            ..Default::default()
        });
        assert!(events.is_empty());
    }

    #[test]
    fn trace_co_occurs_with_delta() {
        let mut chunk = StreamChunk::delta("working");
        chunk.execution_trace = Some(vec!["dispatching math-agent".into()]);

        let events = normalize_one(chunk);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ChunkEvent::TraceAppend { lines: vec!["dispatching math-agent".into()] }
        );
        assert_eq!(events[1], ChunkEvent::ContentDelta { delta: "working".into() });
    }

    #[test]
    fn empty_trace_not_emitted() {
        let mut chunk = StreamChunk::delta("x");
        chunk.execution_trace = Some(Vec::new());
        let events = normalize_one(chunk);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn call_and_response_on_one_chunk() {
        let mut chunk = StreamChunk::dispatch_call("math-agent", "2+2");
        chunk.agent_response = Some(ResponseField::Bare("4".into()));

        let events = normalize_one(chunk);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ChunkEvent::Call { .. }));
        // The bare response attributes to the call emitted just before it.
        assert_eq!(
            events[1],
            ChunkEvent::Response {
                agent_id: AgentId::from_raw("math-agent"),
                response: "4".into(),
            }
        );
    }
}
