use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

/// How a request dispatcher answers a peer request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Respond right away with a result or an error value.
    Now(Result<Value, Value>),
    /// The answer comes later through an explicit respond call carrying the
    /// request id the dispatcher was given.
    Deferred,
}

/// Receives requests and notifications sent by the peer.
///
/// Dispatchers run on the loop thread and have no access to the channel they
/// serve. Follow-up traffic on the same channel has to be issued after they
/// return, for example by answering with [`Reply::Deferred`].
pub trait Dispatcher {
    fn handle_request(&mut self, request_id: u64, method: &str, params: Value) -> Reply;

    fn handle_notification(&mut self, method: &str, params: Value) {
        debug!(method, %params, "notification ignored");
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    fn handle_request(&mut self, request_id: u64, method: &str, params: Value) -> Reply {
        (**self).handle_request(request_id, method, params)
    }

    fn handle_notification(&mut self, method: &str, params: Value) {
        (**self).handle_notification(method, params)
    }
}

type MethodFn = Box<dyn FnMut(Value) -> Result<Value, Value>>;
type NotifyFn = Box<dyn FnMut(Value)>;

/// Dispatcher backed by per-method closures.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodFn>,
    notifications: HashMap<String, NotifyFn>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler.
    pub fn method(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(Value) -> Result<Value, Value> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Box::new(handler));
        self
    }

    /// Register a notification handler.
    pub fn notification(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(Value) + 'static,
    ) -> Self {
        self.notifications.insert(name.into(), Box::new(handler));
        self
    }
}

impl Dispatcher for MethodTable {
    fn handle_request(&mut self, _request_id: u64, method: &str, params: Value) -> Reply {
        match self.methods.get_mut(method) {
            Some(handler) => Reply::Now(handler(params)),
            None => Reply::Now(Err(Value::String(format!("Invalid method: {method}")))),
        }
    }

    fn handle_notification(&mut self, method: &str, params: Value) {
        match self.notifications.get_mut(method) {
            Some(handler) => handler(params),
            None => debug!(method, "no handler for notification"),
        }
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        notifications.sort();
        f.debug_struct("MethodTable")
            .field("methods", &methods)
            .field("notifications", &notifications)
            .finish()
    }
}
