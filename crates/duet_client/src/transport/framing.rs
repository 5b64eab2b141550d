use serde_json::Value;
use shared::error::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single buffered frame. The first object model snapshot is
/// the largest frame the control server sends.
pub const DEFAULT_FRAME_LIMIT: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Splits a byte stream of back-to-back JSON documents into values.
pub struct JsonFrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    limit: usize,
}

impl<R: AsyncRead + Unpin + Send> JsonFrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_FRAME_LIMIT)
    }

    pub fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            limit,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Value, FrameError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decode_buffered() {
                return frame;
            }
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                self.buffer.clear();
                return Err(FrameError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
            if self.buffer.len() > self.limit {
                self.buffer.clear();
                return Err(FrameError::TooLarge { limit: self.limit });
            }
        }
    }

    fn decode_buffered(&mut self) -> Option<Result<Value, FrameError>> {
        let leading = self
            .buffer
            .iter()
            .take_while(|byte| byte.is_ascii_whitespace())
            .count();
        self.buffer.drain(..leading);
        if self.buffer.is_empty() {
            return None;
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buffer.drain(..consumed);
                Some(Ok(value))
            }
            Some(Err(err)) if err.is_eof() => None,
            Some(Err(err)) => {
                // Resynchronise on the next chunk rather than re-reading garbage.
                self.buffer.clear();
                Some(Err(FrameError::Malformed(err)))
            }
            None => None,
        }
    }
}

/// Decodes a frame that arrived whole, e.g. one WebSocket text message.
pub fn decode_text_frame(text: &str) -> Result<Value, FrameError> {
    serde_json::from_str(text).map_err(|err| {
        if err.is_eof() {
            FrameError::Truncated(err.to_string())
        } else {
            FrameError::Malformed(err)
        }
    })
}
