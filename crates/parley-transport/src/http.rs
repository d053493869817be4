use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

use parley_core::errors::TransportError;
use parley_core::transport::{ChunkStream, QueryTransport};
use parley_core::wire::{AgentDirectory, AgentInfo, QueryRequest, StreamChunk};

use crate::sse::{SseFrame, SseFrameBuffer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 64;

/// Transport over the backend's HTTP API: `POST /api/query` for SSE streams,
/// `GET /api/agents` for the directory.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    async fn stream(&self, request: &QueryRequest) -> Result<ChunkStream, TransportError> {
        let resp = self
            .client
            .post(format!("{}/api/query", self.base_url))
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        let mut byte_stream = resp.bytes_stream();
        let (tx, rx) = mpsc::channel::<Result<StreamChunk, TransportError>>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut frames = SseFrameBuffer::new();
            while let Some(next) = byte_stream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(TransportError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                for frame in frames.push(&bytes) {
                    match frame {
                        SseFrame::Done => return,
                        SseFrame::Data(payload) => {
                            if !forward_payload(&payload, &tx).await {
                                // Receiver dropped — the request was cancelled.
                                return;
                            }
                        }
                    }
                }
            }
            for frame in frames.finish() {
                if let SseFrame::Data(payload) = frame {
                    forward_payload(&payload, &tx).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn agents(&self) -> Result<Vec<AgentInfo>, TransportError> {
        let resp = self
            .client
            .get(format!("{}/api/agents", self.base_url))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        let directory: AgentDirectory = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(directory.agents)
    }
}

/// Decode one SSE payload and forward it. Malformed chunks are dropped with
/// a diagnostic; the stream continues. Returns false once the receiver is
/// gone.
async fn forward_payload(
    payload: &str,
    tx: &mpsc::Sender<Result<StreamChunk, TransportError>>,
) -> bool {
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => tx.send(Ok(chunk)).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, payload, "Dropping unparseable chunk");
            true
        }
    }
}
