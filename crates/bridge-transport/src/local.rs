//! In-memory transport.
//!
//! A pub/sub client that never leaves the process. Connection state moves
//! immediately, socket ids are assigned locally, and events are injected
//! with [`LocalClient::trigger`]. Recent calls are recorded so the
//! gateway's behaviour can be checked from the outside.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::auth::AuthRequest;
use crate::options::ClientOptions;
use crate::traits::{
    CallbackId, ChannelHandle, ClientFactory, ConnectionDelegate, PusherClient, TransportError,
    TransportEvent, TransportState,
};

/// Default socket id prefix.
pub const DEFAULT_SOCKET_PREFIX: &str = "123";

/// Number of calls a client keeps in its log. Older calls are dropped.
pub const CALL_LOG_CAPACITY: usize = 256;

/// A call made on a [`LocalClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCall {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `subscribe`
    Subscribe(String),
    /// `subscribe_private`
    SubscribePrivate(String),
    /// `subscribe_presence`
    SubscribePresence(String),
    /// Authorization request built for a private or presence subscription.
    Authorize(AuthRequest),
    /// `unsubscribe`
    Unsubscribe(String),
    /// `unbind_all`
    UnbindAll,
    /// `unsubscribe_all`
    UnsubscribeAll,
}

type SharedCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// A channel on the in-memory transport.
pub struct LocalChannel {
    name: String,
    callbacks: Mutex<HashMap<CallbackId, (String, SharedCallback)>>,
    next_callback: AtomicU64,
}

impl LocalChannel {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callbacks: Mutex::new(HashMap::new()),
            next_callback: AtomicU64::new(0),
        }
    }

    /// Number of callbacks bound to `event_name`.
    #[must_use]
    pub fn callback_count(&self, event_name: &str) -> usize {
        self.callbacks
            .lock()
            .values()
            .filter(|(event, _)| event == event_name)
            .count()
    }

    /// Total number of bound callbacks.
    #[must_use]
    pub fn total_callbacks(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Invoke every callback bound to `event_name`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, event_name: &str, data: &str) -> usize {
        let targets: Vec<SharedCallback> = self
            .callbacks
            .lock()
            .values()
            .filter(|(event, _)| event == event_name)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &targets {
            callback(TransportEvent::new(self.name.clone(), event_name, data));
        }

        trace!(channel = %self.name, event = %event_name, recipients = targets.len(), "Emitted event");
        targets.len()
    }
}

impl ChannelHandle for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, event_name: &str, callback: crate::traits::EventCallback) -> CallbackId {
        let id = format!(
            "{}:{}",
            self.name,
            self.next_callback.fetch_add(1, Ordering::Relaxed)
        );
        self.callbacks
            .lock()
            .insert(id.clone(), (event_name.to_string(), Arc::from(callback)));
        debug!(channel = %self.name, event = %event_name, callback = %id, "Callback bound");
        id
    }

    fn unbind(&self, event_name: &str, callback_id: &str) {
        let mut callbacks = self.callbacks.lock();
        if callbacks
            .get(callback_id)
            .is_some_and(|(event, _)| event == event_name)
        {
            callbacks.remove(callback_id);
            debug!(channel = %self.name, event = %event_name, callback = %callback_id, "Callback unbound");
        }
    }

    fn unbind_all(&self) {
        self.callbacks.lock().clear();
    }
}

/// An in-memory pub/sub client.
pub struct LocalClient {
    app_key: String,
    options: ClientOptions,
    delegate: Arc<dyn ConnectionDelegate>,
    state: Mutex<TransportState>,
    socket_id: Mutex<Option<String>>,
    socket_prefix: String,
    connections: AtomicU64,
    channels: DashMap<String, Arc<LocalChannel>>,
    calls: Mutex<VecDeque<LocalCall>>,
}

impl LocalClient {
    fn new(
        app_key: &str,
        options: ClientOptions,
        delegate: Arc<dyn ConnectionDelegate>,
        socket_prefix: &str,
    ) -> Self {
        debug!(url = %options.url(app_key), "Local client configured");
        Self {
            app_key: app_key.to_string(),
            options,
            delegate,
            state: Mutex::new(TransportState::Initialized),
            socket_id: Mutex::new(None),
            socket_prefix: socket_prefix.to_string(),
            connections: AtomicU64::new(0),
            channels: DashMap::new(),
            calls: Mutex::new(VecDeque::with_capacity(CALL_LOG_CAPACITY)),
        }
    }

    /// Application key the client was created with.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Current native state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// The most recent calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<LocalCall> {
        self.calls.lock().iter().cloned().collect()
    }

    /// A subscribed channel.
    #[must_use]
    pub fn channel(&self, channel_name: &str) -> Option<Arc<LocalChannel>> {
        self.channels.get(channel_name).map(|c| Arc::clone(c.value()))
    }

    /// Names of subscribed channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Raise an event on a subscribed channel.
    ///
    /// Returns the number of callbacks invoked.
    pub fn trigger(&self, channel_name: &str, event_name: &str, data: &str) -> usize {
        match self.channel(channel_name) {
            Some(channel) => channel.emit(event_name, data),
            None => {
                debug!(channel = %channel_name, "Trigger on unsubscribed channel");
                0
            }
        }
    }

    /// Move to `next`, reporting the transition to the delegate.
    ///
    /// Does nothing if the client is already in `next`.
    pub fn transition(&self, next: TransportState) {
        let previous = {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            std::mem::replace(&mut *state, next)
        };

        match next {
            TransportState::Connected => {
                let n = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
                *self.socket_id.lock() = Some(format!("{}.{}", self.socket_prefix, n));
            }
            TransportState::Connecting => {}
            _ => *self.socket_id.lock() = None,
        }

        debug!(from = %previous, to = %next, "Local transport state change");
        self.delegate.changed_connection_state(previous, next);
    }

    fn record(&self, call: LocalCall) {
        let mut calls = self.calls.lock();
        if calls.len() == CALL_LOG_CAPACITY {
            calls.pop_front();
        }
        calls.push_back(call);
    }

    /// Build the auth request for a channel, if an endpoint is configured.
    fn authorize(&self, channel_name: &str) {
        let socket_id = self.socket_id().unwrap_or_default();
        if let Some(request) = self.options.authorizer.request_for(&socket_id, channel_name) {
            debug!(
                channel = %channel_name,
                url = %request.url,
                json = request.body.is_json(),
                "Authorizing channel"
            );
            self.record(LocalCall::Authorize(request));
        }
    }

    fn subscribe_channel(&self, channel_name: &str) -> Arc<dyn ChannelHandle> {
        let channel: Arc<LocalChannel> = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| Arc::new(LocalChannel::new(channel_name)))
            .value()
            .clone();
        channel
    }
}

impl PusherClient for LocalClient {
    fn connect(&self) {
        self.record(LocalCall::Connect);
        if self.state() == TransportState::Connected {
            return;
        }
        self.transition(TransportState::Connecting);
        self.transition(TransportState::Connected);
    }

    fn disconnect(&self) {
        self.record(LocalCall::Disconnect);
        if matches!(
            self.state(),
            TransportState::Disconnected | TransportState::Initialized
        ) {
            return;
        }
        self.transition(TransportState::Disconnecting);
        self.transition(TransportState::Disconnected);
    }

    fn subscribe(&self, channel_name: &str) -> Result<Arc<dyn ChannelHandle>, TransportError> {
        self.record(LocalCall::Subscribe(channel_name.to_string()));
        Ok(self.subscribe_channel(channel_name))
    }

    fn subscribe_private(
        &self,
        channel_name: &str,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError> {
        self.record(LocalCall::SubscribePrivate(channel_name.to_string()));
        self.authorize(channel_name);
        Ok(self.subscribe_channel(channel_name))
    }

    fn subscribe_presence(
        &self,
        channel_name: &str,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError> {
        self.record(LocalCall::SubscribePresence(channel_name.to_string()));
        self.authorize(channel_name);
        Ok(self.subscribe_channel(channel_name))
    }

    fn unsubscribe(&self, channel_name: &str) {
        self.record(LocalCall::Unsubscribe(channel_name.to_string()));
        if let Some((_, channel)) = self.channels.remove(channel_name) {
            channel.unbind_all();
        }
    }

    fn unbind_all(&self) {
        self.record(LocalCall::UnbindAll);
    }

    fn unsubscribe_all(&self) {
        self.record(LocalCall::UnsubscribeAll);
        self.channels.clear();
    }

    fn socket_id(&self) -> Option<String> {
        self.socket_id.lock().clone()
    }
}

/// Creates [`LocalClient`]s, keeping a handle on the latest one.
pub struct LocalFactory {
    socket_prefix: String,
    latest: Mutex<Option<Arc<LocalClient>>>,
    created: AtomicU64,
}

impl LocalFactory {
    /// Create a factory with the default socket id prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_socket_prefix(DEFAULT_SOCKET_PREFIX)
    }

    /// Create a factory whose clients use `prefix` for socket ids.
    #[must_use]
    pub fn with_socket_prefix(prefix: impl Into<String>) -> Self {
        Self {
            socket_prefix: prefix.into(),
            latest: Mutex::new(None),
            created: AtomicU64::new(0),
        }
    }

    /// Most recently created client.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<LocalClient>> {
        self.latest.lock().clone()
    }

    /// Number of clients created so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl Default for LocalFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for LocalFactory {
    fn create(
        &self,
        app_key: &str,
        options: ClientOptions,
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Result<Arc<dyn PusherClient>, TransportError> {
        let client = Arc::new(LocalClient::new(
            app_key,
            options,
            delegate,
            &self.socket_prefix,
        ));
        // The previous client is dropped once the gateway releases it.
        *self.latest.lock() = Some(Arc::clone(&client));
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(app_key = %app_key, created, "Created local client");
        Ok(client)
    }
}
