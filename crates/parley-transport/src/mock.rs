use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use parley_core::errors::TransportError;
use parley_core::transport::{ChunkStream, QueryTransport};
use parley_core::wire::{AgentInfo, QueryRequest, StreamChunk};

/// Pre-programmed replies for deterministic testing without a backend.
#[derive(Clone)]
pub enum MockReply {
    /// Yield a sequence of chunks, then end the stream normally.
    Chunks(Vec<StreamChunk>),
    /// Return an error from the stream() call itself.
    Error(TransportError),
    /// Yield a sequence of chunks, then fail mid-stream.
    Interrupted(Vec<StreamChunk>, TransportError),
    /// Yield chunks with a pause before each one.
    Paced(Duration, Vec<StreamChunk>),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: content deltas followed by a completion chunk.
    pub fn streamed(deltas: &[&str], full_answer: &str) -> Self {
        let mut chunks: Vec<StreamChunk> = deltas.iter().map(|d| StreamChunk::delta(*d)).collect();
        chunks.push(StreamChunk::completed(full_answer));
        Self::Chunks(chunks)
    }

    /// Convenience: a stream whose only chunk is an upstream error.
    pub fn upstream_error(message: &str) -> Self {
        Self::Chunks(vec![StreamChunk::upstream_error(message)])
    }

    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock transport that returns pre-programmed replies in sequence and
/// records every request it receives.
pub struct MockTransport {
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<QueryRequest>>,
    agents: Vec<AgentInfo>,
}

impl MockTransport {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            agents: Vec::new(),
        }
    }

    pub fn with_agents(mut self, agents: Vec<AgentInfo>) -> Self {
        self.agents = agents;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request passed to stream(), in order.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<QueryRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl QueryTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &QueryRequest) -> Result<ChunkStream, TransportError> {
        self.requests.lock().push(request.clone());
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let Some(reply) = self.replies.get(idx) else {
            return Err(TransportError::InvalidRequest(format!(
                "MockTransport: no reply configured for call {idx}"
            )));
        };

        resolve_reply(reply.clone()).await
    }

    async fn agents(&self) -> Result<Vec<AgentInfo>, TransportError> {
        Ok(self.agents.clone())
    }
}

/// Resolve a MockReply, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_reply(reply: MockReply) -> Result<ChunkStream, TransportError> {
    let mut current = reply;
    loop {
        match current {
            MockReply::Chunks(chunks) => {
                return Ok(Box::pin(stream::iter(
                    chunks.into_iter().map(Ok::<_, TransportError>),
                )));
            }
            MockReply::Error(e) => return Err(e),
            MockReply::Interrupted(chunks, e) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e)))
                    .collect::<Vec<_>>();
                return Ok(Box::pin(stream::iter(items)));
            }
            MockReply::Paced(gap, chunks) => {
                let paced = stream::iter(chunks).then(move |chunk| async move {
                    tokio::time::sleep(gap).await;
                    Ok::<_, TransportError>(chunk)
                });
                return Ok(Box::pin(paced));
            }
            MockReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
