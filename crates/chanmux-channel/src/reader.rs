use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Callback receiving peer output.
pub type Consumer = Box<dyn FnMut(&[u8])>;

/// Delivers one output stream of a channel to its consumer.
///
/// Unbuffered readers hand every chunk over as it arrives. Buffered readers
/// accumulate and deliver one coalesced chunk at the flush point, which is
/// the end of the stream. A buffered reader without a consumer keeps its data
/// until someone takes it.
pub struct OutputReader {
    consumer: Option<Consumer>,
    buffered: bool,
    buffer: BytesMut,
    closed: bool,
}

impl OutputReader {
    pub fn new(buffered: bool) -> Self {
        Self {
            consumer: None,
            buffered,
            buffer: BytesMut::new(),
            closed: false,
        }
    }

    pub fn set_consumer(&mut self, consumer: impl FnMut(&[u8]) + 'static) {
        self.consumer = Some(Box::new(consumer));
    }

    pub fn clear_consumer(&mut self) {
        self.consumer = None;
    }

    /// True iff a consumer is registered.
    pub fn is_active(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes held for a later flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.closed {
            trace!(len = chunk.len(), "output after close dropped");
            return;
        }
        if self.buffered {
            self.buffer.extend_from_slice(chunk);
            return;
        }
        match self.consumer.as_mut() {
            Some(consumer) => consumer(chunk),
            None => trace!(len = chunk.len(), "output without consumer dropped"),
        }
    }

    /// Deliver buffered data as one chunk. Without a consumer the data stays.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if let Some(consumer) = self.consumer.as_mut() {
            let data = self.buffer.split();
            consumer(&data);
        }
    }

    /// Flush what is left and stop delivering. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        self.consumer = None;
        self.closed = true;
    }

    /// Take data that no consumer received.
    pub fn take_buffer(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }
}

impl std::fmt::Debug for OutputReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputReader")
            .field("active", &self.is_active())
            .field("buffered", &self.buffered)
            .field("pending", &self.buffer.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn recording(reader: &mut OutputReader) -> Rc<RefCell<Vec<Vec<u8>>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        reader.set_consumer(move |data| sink.borrow_mut().push(data.to_vec()));
        seen
    }

    #[test]
    fn unbuffered_delivers_each_chunk_in_order() {
        let mut reader = OutputReader::new(false);
        let seen = recording(&mut reader);

        for chunk in [b"a", b"b", b"c"] {
            reader.feed(chunk);
        }
        assert_eq!(*seen.borrow(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn buffered_coalesces_until_close() {
        let mut reader = OutputReader::new(true);
        let seen = recording(&mut reader);

        for chunk in [b"a", b"b", b"c"] {
            reader.feed(chunk);
        }
        assert!(seen.borrow().is_empty());
        assert_eq!(reader.buffered_len(), 3);

        reader.close();
        reader.close();
        assert_eq!(*seen.borrow(), vec![b"abc".to_vec()]);
        assert!(!reader.is_active());
        assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn close_without_pending_data_delivers_nothing() {
        let mut reader = OutputReader::new(true);
        let seen = recording(&mut reader);
        reader.close();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn buffered_without_consumer_keeps_data() {
        let mut reader = OutputReader::new(true);
        reader.feed(b"kept ");
        reader.feed(b"output");
        reader.close();

        assert_eq!(&reader.take_buffer()[..], b"kept output");
        assert!(reader.take_buffer().is_empty());
    }

    #[test]
    fn unbuffered_without_consumer_drops_data() {
        let mut reader = OutputReader::new(false);
        reader.feed(b"lost");
        assert!(!reader.is_active());
        assert!(reader.take_buffer().is_empty());
    }

    #[test]
    fn feed_after_close_is_ignored() {
        let mut reader = OutputReader::new(false);
        let seen = recording(&mut reader);
        reader.close();
        reader.feed(b"late");
        assert!(seen.borrow().is_empty());
    }
}
