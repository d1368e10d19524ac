use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use chanmux_frame::{FrameConfig, FrameError, FrameWriter, Message, MessageDecoder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::{Dispatcher, Reply};
use crate::error::{CallError, Result, RpcError};
use crate::pending::{PendingCall, PendingEntry};

/// Configuration for the RPC layer of a channel.
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    /// Framing limits applied to both directions.
    pub frame: FrameConfig,
}

/// Request/response correlation for one channel.
///
/// The state is `open` until the transport reports EOF or an error, then
/// `closed` for good. Closing resolves every pending call with
/// [`CallError::ChannelClosed`] in request-id order.
///
/// The state never owns the transport: every operation that writes takes the
/// channel's output stream as an argument.
pub struct RpcState {
    pending: BTreeMap<u64, PendingEntry>,
    next_request_id: u64,
    closed: bool,
    decoder: MessageDecoder,
    writer: FrameWriter,
    dispatcher: Option<Box<dyn Dispatcher>>,
    deferred: BTreeSet<u64>,
}

impl RpcState {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_request_id: 1,
            closed: false,
            decoder: MessageDecoder::with_config(config.frame.clone()),
            writer: FrameWriter::new(config.frame),
            dispatcher: None,
            deferred: BTreeSet::new(),
        }
    }

    /// Install the handler for peer requests and notifications.
    pub fn set_dispatcher(&mut self, dispatcher: impl Dispatcher + 'static) {
        self.dispatcher = Some(Box::new(dispatcher));
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of peer requests awaiting a deferred reply.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Id the next outgoing request will carry.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id
    }

    /// Send a request and return the handle its response resolves.
    pub fn send_request<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        method: &str,
        params: Value,
    ) -> Result<PendingCall> {
        if self.closed {
            return Err(RpcError::ChannelClosed);
        }

        let id = self.next_request_id;
        self.next_request_id += 1;

        self.write(out, &Message::request(id, method, params))?;

        let (call, entry) = PendingCall::new(id, method);
        self.pending.insert(id, entry);
        debug!(id, method, "request sent");
        Ok(call)
    }

    /// Send a fire-and-forget notification.
    pub fn send_notification<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        method: &str,
        params: Value,
    ) -> Result<()> {
        if self.closed {
            return Err(RpcError::ChannelClosed);
        }
        self.write(out, &Message::notification(method, params))?;
        debug!(method, "notification sent");
        Ok(())
    }

    /// Answer a peer request whose dispatcher returned [`Reply::Deferred`].
    pub fn respond<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        request_id: u64,
        outcome: std::result::Result<Value, Value>,
    ) -> Result<()> {
        if self.closed {
            return Err(RpcError::ChannelClosed);
        }
        if !self.deferred.remove(&request_id) {
            return Err(RpcError::UnknownRequest(request_id));
        }
        self.write_response(out, request_id, outcome)
    }

    /// Feed raw transport bytes and process every complete message.
    ///
    /// Malformed messages are logged and dropped, as are local failures while
    /// handling one message. A framing desync or a write fault closes the
    /// state and is returned so the caller can tear the transport down.
    pub fn receive<W: Write + ?Sized>(&mut self, data: &[u8], out: &mut W) -> Result<()> {
        if self.closed {
            debug!(len = data.len(), "dropping input after close");
            return Ok(());
        }
        self.decoder.feed(data);

        while !self.closed {
            match self.decoder.next_message() {
                Ok(Some(message)) => {
                    if let Err(err) = self.on_frame_received(message, out) {
                        if self.closed {
                            return Err(err);
                        }
                        warn!(error = %err, "rpc message not handled");
                    }
                }
                Ok(None) => break,
                Err(err) if err.is_desync() => {
                    warn!(error = %err, "rpc stream desynchronized");
                    self.on_transport_closed();
                    return Err(err.into());
                }
                Err(err) => warn!(error = %err, "dropping malformed rpc message"),
            }
        }
        Ok(())
    }

    /// Dispatch one decoded message.
    pub fn on_frame_received<W: Write + ?Sized>(
        &mut self,
        message: Message,
        out: &mut W,
    ) -> Result<()> {
        if self.closed {
            debug!(kind = message.kind(), "dropping message after close");
            return Ok(());
        }

        match message {
            Message::Response { id, error, result } => {
                let Some(entry) = self.pending.remove(&id) else {
                    warn!(id, "response for unknown request id");
                    return Ok(());
                };
                let outcome = match error {
                    Some(error) => Err(CallError::Remote(error)),
                    None => Ok(result),
                };
                debug!(id, ok = outcome.is_ok(), "response received");
                entry.resolve(outcome);
                Ok(())
            }
            Message::Request { id, method, params } => {
                let reply = match self.dispatcher.as_mut() {
                    Some(dispatcher) => dispatcher.handle_request(id, &method, params),
                    None => Reply::Now(Err(Value::String(format!(
                        "No request handler for method: {method}"
                    )))),
                };
                match reply {
                    Reply::Now(outcome) => self.write_response(out, id, outcome),
                    Reply::Deferred => {
                        debug!(id, method = %method, "request deferred");
                        self.deferred.insert(id);
                        Ok(())
                    }
                }
            }
            Message::Notification { method, params } => {
                match self.dispatcher.as_mut() {
                    Some(dispatcher) => dispatcher.handle_notification(&method, params),
                    None => debug!(method = %method, "notification without dispatcher"),
                }
                Ok(())
            }
        }
    }

    /// Transition to `closed`, failing every pending call. Idempotent.
    pub fn on_transport_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.deferred.clear();

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing pending requests");
        }
        for (_, entry) in pending {
            entry.resolve(Err(CallError::ChannelClosed));
        }
    }

    /// Write a response. If the outcome is too large to send, the peer gets
    /// an error reply with the same id and the refusal is still returned.
    fn write_response<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        id: u64,
        outcome: std::result::Result<Value, Value>,
    ) -> Result<()> {
        match self.write(out, &Message::response(id, outcome)) {
            Err(RpcError::Frame(FrameError::MessageTooLarge { size, max })) => {
                warn!(id, size, max, "response too large; replying with an error");
                let reason = format!("Response too large: {size} bytes, max {max}");
                self.write(out, &Message::response(id, Err(Value::String(reason))))?;
                Err(FrameError::MessageTooLarge { size, max }.into())
            }
            written => written,
        }
    }

    fn write<W: Write + ?Sized>(&mut self, out: &mut W, message: &Message) -> Result<()> {
        if let Err(err) = self.writer.write_message(out, message) {
            let err = RpcError::from(err);
            if err.is_transport_fault() {
                warn!(error = %err, "rpc write failed; closing");
                self.on_transport_closed();
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for RpcState {
    fn drop(&mut self) {
        self.on_transport_closed();
    }
}

impl std::fmt::Debug for RpcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcState")
            .field("closed", &self.closed)
            .field("next_request_id", &self.next_request_id)
            .field("pending", &self.pending.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
