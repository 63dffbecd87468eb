//! Wire framing: `[length][command-id][task-id][body]`
//!
//! All header fields are big-endian `u32`; `length` counts the whole frame
//! including the header. Deframing is incremental: callers keep an
//! accumulation buffer and feed it back until a full frame is available. A
//! malformed length is unrecoverable — the stream has lost sync — so it is
//! surfaced as a hard [`FrameError`], never as `Continue`.

use crate::errors::FrameError;

/// Bytes occupied by `[length][cmd_id][task_id]`.
pub const HEADER_LEN: usize = 12;

/// No single frame may exceed this; anything larger is treated as stream
/// corruption.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

// Reserved task ids at the top of the range. Frames carrying them belong to
// the channel itself, not to any scheduled task.
pub const NOOP_TASK_ID: u32 = 0xFFFF_FFFF;
pub const IDENTITY_TASK_ID: u32 = 0xFFFF_FFFE;
pub const KEEPALIVE_TASK_ID: u32 = 0xFFFF_FFFD;

/// True for ids the channel reserves for its own traffic.
pub fn is_reserved_task_id(task_id: u32) -> bool {
    task_id >= KEEPALIVE_TASK_ID
}

/// One complete wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd_id: u32,
    pub task_id: u32,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(cmd_id: u32, task_id: u32, body: Vec<u8>) -> Self {
        Self {
            cmd_id,
            task_id,
            body,
        }
    }

    /// Heartbeat request with the given command id and an empty body.
    pub fn heartbeat(cmd_id: u32) -> Self {
        Self::new(cmd_id, NOOP_TASK_ID, Vec::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = HEADER_LEN + self.body.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&self.cmd_id.to_be_bytes());
        out.extend_from_slice(&self.task_id.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Result of one deframing step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decode {
    /// A full frame was buffered; `consumed` bytes must be drained from the
    /// front of the accumulation buffer.
    Packet { frame: Frame, consumed: usize },
    /// Not enough bytes yet; keep reading.
    Continue,
}

/// Try to deframe one message from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<Decode, FrameError> {
    if buf.len() < 4 {
        return Ok(Decode::Continue);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (len as usize) < HEADER_LEN {
        return Err(FrameError::LengthUnderflow { len });
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameError::LengthOverflow {
            len,
            limit: MAX_FRAME_LEN,
        });
    }

    if buf.len() < len as usize {
        return Ok(Decode::Continue);
    }

    let cmd_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let task_id = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let body = buf[HEADER_LEN..len as usize].to_vec();

    Ok(Decode::Packet {
        frame: Frame {
            cmd_id,
            task_id,
            body,
        },
        consumed: len as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::new(42, 7, b"hello".to_vec());
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 5);

        match decode(&bytes).unwrap() {
            Decode::Packet { frame: got, consumed } => {
                assert_eq!(got, frame);
                assert_eq!(consumed, bytes.len());
            }
            Decode::Continue => panic!("expected a full frame"),
        }
    }

    #[test]
    fn partial_frame_continues() {
        let bytes = Frame::new(1, 2, vec![0u8; 100]).encode();
        for cut in [0, 3, 4, HEADER_LEN, bytes.len() - 1] {
            assert_eq!(decode(&bytes[..cut]).unwrap(), Decode::Continue);
        }
    }

    #[test]
    fn trailing_bytes_left_for_next_frame() {
        let first = Frame::new(1, 1, b"a".to_vec());
        let second = Frame::new(2, 2, b"bb".to_vec());
        let mut buf = first.encode();
        buf.extend_from_slice(&second.encode());

        let consumed = match decode(&buf).unwrap() {
            Decode::Packet { frame, consumed } => {
                assert_eq!(frame, first);
                consumed
            }
            Decode::Continue => panic!("expected a full frame"),
        };
        buf.drain(..consumed);

        match decode(&buf).unwrap() {
            Decode::Packet { frame, .. } => assert_eq!(frame, second),
            Decode::Continue => panic!("expected the second frame"),
        }
    }

    #[test]
    fn malformed_length_is_fatal() {
        // length below header size
        let mut bytes = Frame::new(1, 1, vec![]).encode();
        bytes[..4].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(FrameError::LengthUnderflow { len: 3 })
        ));

        // absurd length
        bytes[..4].copy_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(FrameError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn reserved_ids_sit_at_the_top() {
        assert!(is_reserved_task_id(NOOP_TASK_ID));
        assert!(is_reserved_task_id(IDENTITY_TASK_ID));
        assert!(is_reserved_task_id(KEEPALIVE_TASK_ID));
        assert!(!is_reserved_task_id(0));
        assert!(!is_reserved_task_id(KEEPALIVE_TASK_ID - 1));
    }
}
