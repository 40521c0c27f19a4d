//! Length-free JSON framing.
//!
//! A frame ends where the accumulated bytes first parse as one JSON document.
//! Parse failures caused by truncation mean "read more". Parse failures caused
//! by content are reported as [`FrameStatus::Malformed`], but transports keep
//! reading in that case too, because a slow frame and a corrupt one cannot be
//! told apart until the peer's read timeout fires. Bytes trailing a complete
//! object are not supported and make the buffer malformed.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Outcome of attempting to decode an accumulated buffer.
#[derive(Debug)]
pub enum FrameStatus {
    /// The buffer holds exactly one JSON document.
    Complete(Value),
    /// The buffer is empty or ends mid-document.
    Incomplete,
    /// The buffer does not parse for a reason other than truncation.
    Malformed(serde_json::Error),
}

impl FrameStatus {
    /// Returns the decoded value when the frame is complete.
    #[must_use]
    pub fn complete(self) -> Option<Value> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Incomplete | Self::Malformed(_) => None,
        }
    }
}

/// Errors raised while encoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The value could not be rendered as JSON.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encodes `value` as compact UTF-8 JSON with no trailing delimiter.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] when serialisation fails, for example for a
/// map with non-string keys.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, FrameError> {
    Ok(serde_json::to_vec(value)?)
}

/// Attempts to parse the whole of `buffer` as one JSON document.
#[must_use]
pub fn try_decode(buffer: &[u8]) -> FrameStatus {
    if buffer.iter().all(u8::is_ascii_whitespace) {
        return FrameStatus::Incomplete;
    }
    match serde_json::from_slice::<Value>(buffer) {
        Ok(value) => FrameStatus::Complete(value),
        Err(error) if error.is_eof() => FrameStatus::Incomplete,
        Err(error) => FrameStatus::Malformed(error),
    }
}

/// Accumulates reads until a frame completes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and tries to decode the accumulated bytes.
    ///
    /// The buffer is cleared once a frame completes; otherwise the bytes are
    /// retained for the next read.
    pub fn push(&mut self, chunk: &[u8]) -> FrameStatus {
        self.bytes.extend_from_slice(chunk);
        let status = try_decode(&self.bytes);
        if matches!(status, FrameStatus::Complete(_)) {
            self.bytes.clear();
        }
        status
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Reports whether no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Takes the buffered bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{Command, Envelope};

    #[test]
    fn encode_has_no_delimiter() {
        let bytes = encode(&Command::bare("get_scene_info")).expect("encode");
        assert_eq!(bytes, br#"{"type":"get_scene_info","params":{}}"#);
    }

    #[test]
    fn command_survives_the_wire() {
        let mut params = crate::Params::new();
        params.insert("name".to_owned(), json!("Cube"));
        let command = Command::new("get_object_info", params);
        let bytes = encode(&command).expect("encode");
        let value = try_decode(&bytes).complete().expect("complete");
        assert_eq!(Command::from_value(value).expect("command"), command);
    }

    #[test]
    fn envelope_survives_the_wire() {
        let envelope = Envelope::error("Object not found: Lamp");
        let bytes = encode(&envelope).expect("encode");
        let value = try_decode(&bytes).complete().expect("complete");
        let decoded: Envelope = serde_json::from_value(value).expect("envelope");
        assert_eq!(decoded, envelope);
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::whitespace(b"  \n".as_slice())]
    #[case::open_brace(b"{".as_slice())]
    #[case::mid_key(br#"{"ty"#.as_slice())]
    #[case::mid_string(br#"{"type":"get_sc"#.as_slice())]
    #[case::missing_close(br#"{"type":"x","params":{}"#.as_slice())]
    fn truncated_input_is_incomplete(#[case] input: &[u8]) {
        assert!(matches!(try_decode(input), FrameStatus::Incomplete));
    }

    #[rstest]
    #[case::garbage(b"not json".as_slice())]
    #[case::trailing_bytes(br#"{"type":"x"}{"type":"y"}"#.as_slice())]
    #[case::bad_token(br#"{"type": nope}"#.as_slice())]
    fn content_errors_are_malformed(#[case] input: &[u8]) {
        assert!(matches!(try_decode(input), FrameStatus::Malformed(_)));
    }

    #[test]
    fn buffer_completes_across_chunks() {
        let mut buffer = FrameBuffer::new();
        assert!(matches!(buffer.push(br#"{"status":"succ"#), FrameStatus::Incomplete));
        assert_eq!(buffer.len(), 15);
        let value = buffer
            .push(br#"ess","result":{}}"#)
            .complete()
            .expect("complete");
        assert_eq!(value, json!({"status": "success", "result": {}}));
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_keeps_bytes_when_malformed() {
        let mut buffer = FrameBuffer::new();
        assert!(matches!(buffer.push(b"}{"), FrameStatus::Malformed(_)));
        assert_eq!(buffer.take(), b"}{");
        assert!(buffer.is_empty());
    }
}
