use crate::error::{CallError, CallResult};

/// Handle to an in-flight request.
///
/// Resolves exactly once: with the peer's result or error, or with
/// [`CallError::ChannelClosed`] if the channel goes away first.
pub struct PendingCall {
    id: u64,
    method: String,
    rx: oneshot::Receiver<CallResult>,
    outcome: Option<CallResult>,
}

impl PendingCall {
    pub(crate) fn new(id: u64, method: &str) -> (Self, PendingEntry) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            id,
            method: method.to_string(),
            rx,
            outcome: None,
        };
        (call, PendingEntry { tx })
    }

    /// Request id assigned to this call.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The outcome, if the call has been resolved.
    pub fn try_result(&mut self) -> Option<&CallResult> {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(oneshot::TryRecvError::Empty) => {}
                // The resolving side vanished without answering.
                Err(oneshot::TryRecvError::Disconnected) => {
                    self.outcome = Some(Err(CallError::ChannelClosed))
                }
            }
        }
        self.outcome.as_ref()
    }

    pub fn is_resolved(&mut self) -> bool {
        self.try_result().is_some()
    }

    /// Consume the handle, returning the outcome if resolved.
    pub fn into_result(mut self) -> Option<CallResult> {
        self.try_result();
        self.outcome
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Resolving side of a [`PendingCall`], kept by the RPC state.
pub(crate) struct PendingEntry {
    tx: oneshot::Sender<CallResult>,
}

impl PendingEntry {
    pub(crate) fn resolve(self, outcome: CallResult) {
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = self.tx.send(outcome);
    }
}
