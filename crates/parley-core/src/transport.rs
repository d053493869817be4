use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::TransportError;
use crate::wire::{AgentInfo, QueryRequest, StreamChunk};

/// A finite, non-restartable stream of inbound chunks. Ends by yielding
/// `None` (normal completion) or an `Err` item (transport-level failure).
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, TransportError>> + Send>>;

/// The streaming query transport collaborator.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Open a chunk stream for one query. Cancellation is cooperative: the
    /// caller stops polling and drops the stream.
    async fn stream(&self, request: &QueryRequest) -> Result<ChunkStream, TransportError>;

    /// Fetch the backend's agent directory. Consulted once at conversation
    /// start to seed suggested prompts.
    async fn agents(&self) -> Result<Vec<AgentInfo>, TransportError>;
}
