use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::FrameError;
use crate::message::{encode_message, parse_message, Message};

/// `tokio_util` codec for chanmux RPC messages.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    config: FrameConfig,
}

impl MessageCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(src, self.config.max_payload_size)? {
            Some(payload) => parse_message(&payload).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, MessageCodec::default());
        let mut stream = FramedRead::new(server, MessageCodec::default());

        sink.send(Message::request(1, "ping", json!([]))).await.unwrap();
        sink.send(Message::notification("bye", json!([]))).await.unwrap();
        drop(sink);

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Message::request(1, "ping", json!([])));
        assert_eq!(second, Message::notification("bye", json!([])));
        assert!(stream.next().await.is_none());
    }
}
