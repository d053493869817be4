//! Incremental SSE frame decoding. Network reads arrive in arbitrary slices,
//! so the buffer holds partial frames across `push` calls and only yields
//! payloads once a blank-line terminator is seen.

/// One decoded SSE frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseFrame {
    /// The joined `data:` payload of one frame.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

#[derive(Default)]
pub struct SseFrameBuffer {
    buffer: String,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by this read.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            if let Some(frame) = decode_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    /// Call once at end-of-stream.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let remaining = std::mem::take(&mut self.buffer);
        if remaining.is_empty() {
            return Vec::new();
        }
        decode_block(&remaining).into_iter().collect()
    }
}

fn decode_block(block: &str) -> Option<SseFrame> {
    let data_lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();

    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join("\n");
    if payload == "[DONE]" {
        Some(SseFrame::Done)
    } else {
        Some(SseFrame::Data(payload))
    }
}
