//! Newline-delimited framing over a byte stream
//!
//! One JSON message per `\n`-terminated frame. The transport hands over
//! whatever the socket produced; frames may arrive split across reads or
//! several per read. Blank and undecodable lines are dropped silently:
//! a malformed frame never terminates a round.

use crate::error::ProtocolError;
use crate::message::WireMessage;
use crate::MAX_FRAME_BYTES;

/// Encode one message as a newline-terminated frame
pub fn encode_frame(message: &WireMessage) -> Vec<u8> {
    let mut frame = serde_json::to_vec(message).expect("wire message serialization should not fail");
    frame.push(b'\n');
    frame
}

/// Reassembles frames from arbitrarily chunked reads
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk and return every complete message it finished
    ///
    /// Errors only when the unterminated remainder exceeds
    /// [`MAX_FRAME_BYTES`]; the connection should then be dropped.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<Vec<WireMessage>, ProtocolError> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<WireMessage>(line) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    tracing::trace!(%err, len = line.len(), "dropping undecodable frame");
                }
            }
        }

        if self.pending.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::OversizedFrame {
                len: self.pending.len(),
                max: MAX_FRAME_BYTES,
            });
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RoundId;

    fn commit_frame(id: &str) -> Vec<u8> {
        encode_frame(&WireMessage::Commit {
            round_id: RoundId(id.into()),
            commit: "aa".into(),
        })
    }

    #[test]
    fn test_frame_split_across_reads() {
        let frame = commit_frame("0badf00d");
        let (head, tail) = frame.split_at(7);

        let mut buffer = FrameBuffer::new();
        assert!(buffer.extend(head).unwrap().is_empty());
        let messages = buffer.extend(tail).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], WireMessage::Commit { round_id, .. } if round_id.as_str() == "0badf00d"));
    }

    #[test]
    fn test_multiple_frames_per_read() {
        let mut chunk = commit_frame("aaaaaaaa");
        chunk.extend_from_slice(&commit_frame("bbbbbbbb"));
        chunk.extend_from_slice(b"{\"type\":\"COM");

        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.extend(&chunk).unwrap().len(), 2);
        // the partial tail completes later
        let rest = buffer.extend(b"MIT\",\"roundId\":\"cc\",\"commit\":\"dd\"}\n").unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_malformed_and_blank_lines_are_skipped() {
        let mut buffer = FrameBuffer::new();
        let messages = buffer
            .extend(b"not json\n\n   \n{\"type\":\"NOPE\"}\n")
            .unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_unterminated_frame_overflow() {
        let mut buffer = FrameBuffer::new();
        let big = vec![b'x'; MAX_FRAME_BYTES + 1];
        assert!(matches!(
            buffer.extend(&big),
            Err(ProtocolError::OversizedFrame { .. })
        ));
    }
}
