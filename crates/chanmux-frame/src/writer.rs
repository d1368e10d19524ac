use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::message::{encode_message, Message};

/// Encodes messages into frames and writes each frame whole.
///
/// The writer does not own the stream. It keeps one scratch buffer that is
/// reused across messages, so a channel can hold a single writer and pass
/// whichever output endpoint is current.
#[derive(Debug, Default)]
pub struct FrameWriter {
    scratch: BytesMut,
    config: FrameConfig,
}

impl FrameWriter {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            scratch: BytesMut::new(),
            config,
        }
    }

    /// Encode `message` and write the complete frame to `out`, then flush.
    /// Returns the number of bytes written.
    ///
    /// Oversized messages are rejected before anything reaches `out`.
    pub fn write_message<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        message: &Message,
    ) -> Result<usize> {
        self.scratch.clear();
        encode_message(message, &mut self.scratch)?;

        let payload = self.scratch.len() - HEADER_SIZE;
        if payload > self.config.max_payload_size {
            return Err(FrameError::MessageTooLarge {
                size: payload,
                max: self.config.max_payload_size,
            });
        }

        write_frame(out, &self.scratch)?;
        Ok(self.scratch.len())
    }
}

fn write_frame<W: Write + ?Sized>(out: &mut W, mut frame: &[u8]) -> Result<()> {
    while !frame.is_empty() {
        match out.write(frame) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => frame = &frame[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    loop {
        match out.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use serde_json::json;

    use super::*;
    use crate::decoder::MessageDecoder;

    /// Writer that replays a script of outcomes, then accepts everything.
    #[derive(Default)]
    struct Scripted {
        script: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn with(script: impl IntoIterator<Item = io::Result<usize>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                written: Vec::new(),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.script.pop_front() {
                Some(outcome) => outcome?.min(buf.len()),
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_decode_in_send_order() {
        let mut writer = FrameWriter::default();
        let mut out = Vec::new();
        let first = writer
            .write_message(&mut out, &Message::request(1, "a", json!([])))
            .unwrap();
        writer
            .write_message(&mut out, &Message::notification("b", json!([true])))
            .unwrap();
        assert!(first > HEADER_SIZE);

        let mut decoder = MessageDecoder::new();
        decoder.feed(&out);
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(Message::request(1, "a", json!([])))
        );
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(Message::notification("b", json!([true])))
        );
        assert_eq!(decoder.next_message().unwrap(), None);
    }

    #[test]
    fn oversized_message_writes_nothing() {
        let mut writer = FrameWriter::new(FrameConfig {
            max_payload_size: 8,
        });
        let mut out = Vec::new();
        let err = writer
            .write_message(&mut out, &Message::notification("too-long-method", json!([])))
            .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { max: 8, .. }));
        assert!(!err.is_desync());
        assert!(out.is_empty());
    }

    #[test]
    fn short_and_interrupted_writes_complete_the_frame() {
        let mut out = Scripted::with([
            Ok(3),
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(2),
        ]);
        let message = Message::response(4, Ok(json!("done")));
        let len = FrameWriter::default()
            .write_message(&mut out, &message)
            .unwrap();

        assert_eq!(out.written.len(), len);
        let mut decoder = MessageDecoder::new();
        decoder.feed(&out.written);
        assert_eq!(decoder.next_message().unwrap(), Some(message));
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut out = Scripted::with([Ok(0)]);
        let err = FrameWriter::default()
            .write_message(&mut out, &Message::notification("x", json!([])))
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn io_errors_propagate() {
        let mut out = Scripted::with([Err(io::Error::from(ErrorKind::BrokenPipe))]);
        let err = FrameWriter::default()
            .write_message(&mut out, &Message::notification("x", json!([])))
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }
}
