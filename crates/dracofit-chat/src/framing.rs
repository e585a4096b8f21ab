//! Incremental framing for the chat response body.
//!
//! Bytes arrive in arbitrary batches. They are decoded to text with UTF-8
//! sequences allowed to straddle reads, then split into messages on a blank
//! line (`\n\n`). Only `data: ` lines inside a message carry payloads.

const MESSAGE_SEPARATOR: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";

/// One demarcated message and the payloads of its `data: ` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub data: Vec<String>,
}

/// Streaming UTF-8 decoder that holds back an incomplete trailing sequence
/// until the next chunk completes it.
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left, replacing a truncated sequence.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Splits the decoded text stream into `StreamMessage`s.
#[derive(Default)]
pub struct FrameDecoder {
    utf8: Utf8Decoder,
    buf: String,
}

impl FrameDecoder {
    /// Feeds raw transport bytes.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<StreamMessage> {
        let text = self.utf8.decode(chunk);
        self.push_str(&text)
    }

    /// Feeds already-decoded text.
    pub fn push_str(&mut self, text: &str) -> Vec<StreamMessage> {
        self.buf.push_str(text);
        let mut messages = Vec::new();
        while let Some(idx) = self.buf.find(MESSAGE_SEPARATOR) {
            let raw: String = self.buf.drain(..idx + MESSAGE_SEPARATOR.len()).collect();
            if let Some(message) = parse_message(&raw[..idx]) {
                messages.push(message);
            }
        }
        messages
    }

    /// Ends the stream and returns any unterminated trailing text.
    ///
    /// The trailing text is never interpreted as a message.
    pub fn finish(&mut self) -> String {
        let tail = self.utf8.finish();
        self.buf.push_str(&tail);
        std::mem::take(&mut self.buf)
    }

    /// Bytes of text currently held back waiting for a separator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn parse_message(raw: &str) -> Option<StreamMessage> {
    let data: Vec<String> = raw
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(ToOwned::to_owned)
        .collect();
    if data.is_empty() {
        return None;
    }
    Some(StreamMessage { data })
}
