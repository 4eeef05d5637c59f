//! The gateway.
//!
//! Owns the transport client and both registries, and exposes the host
//! command surface. One lock guards the whole session, and every call into
//! the transport is made while holding it, so a command never reaches a
//! client that a concurrent reset has already torn down. Delivery paths
//! never take that lock.

use bridge_protocol::{InitArgs, ProtocolError};
use parking_lot::Mutex;
use pusher_bridge_transport::options::validate_app_key;
use pusher_bridge_transport::{
    ChannelHandle, ClientFactory, ClientOptions, ConfigError, EventCallback, PusherClient,
    TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::binding::{BindingKey, BindingRegistry};
use crate::bridge::{event_message, EventSink, MessageBridge, SinkId};
use crate::channel::{ChannelRegistry, ChannelType};
use crate::state::StateReporter;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The init payload is invalid.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A command could not be parsed.
    #[error("Malformed command: {0}")]
    Protocol(#[from] ProtocolError),

    /// The transport rejected an operation.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// State owned by one transport client.
struct Session {
    client: Arc<dyn PusherClient>,
    channels: ChannelRegistry,
    bindings: BindingRegistry,
    epoch: u64,
}

impl Session {
    /// Unbind the callback recorded for a pair, if any.
    fn unbind_if_bound(&mut self, channel_name: &str, event_name: &str) -> bool {
        let Some(callback_id) = self.bindings.remove(channel_name, event_name) else {
            return false;
        };
        if let Some(handle) = self.channels.get(channel_name) {
            handle.unbind(event_name, &callback_id);
        }
        true
    }

    /// Unbind every callback recorded for a channel on `handle`.
    fn unbind_channel(&mut self, channel_name: &str, handle: &dyn ChannelHandle) -> usize {
        let removed = self.bindings.remove_channel(channel_name);
        for (event_name, callback_id) in &removed {
            handle.unbind(event_name, callback_id);
        }
        removed.len()
    }

    /// Release everything this session holds on the transport.
    fn close(mut self) {
        self.client.unbind_all();
        self.client.unsubscribe_all();
        for (_, handle) in self.channels.drain() {
            handle.unbind_all();
        }
        self.bindings.clear();
        self.client.disconnect();
    }
}

/// Bridge between host commands and a pub/sub client.
pub struct Gateway {
    factory: Arc<dyn ClientFactory>,
    bridge: Arc<MessageBridge>,
    session: Mutex<Option<Session>>,
}

impl Gateway {
    /// Create a gateway that builds clients with `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            bridge: Arc::new(MessageBridge::new()),
            session: Mutex::new(None),
        }
    }

    /// The outbound message bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<MessageBridge> {
        &self.bridge
    }

    fn verbose(&self) -> bool {
        self.bridge.logging_enabled()
    }

    /// Tear down the current client and create a new one from `args`.
    ///
    /// The previous client is released even if `args` turn out to be
    /// invalid; in that case the gateway is left without a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the client cannot be
    /// constructed.
    pub fn initialize(&self, args: InitArgs) -> Result<(), GatewayError> {
        let mut session = self.session.lock();
        let epoch = self.reset_locked(&mut session);

        self.bridge.set_logging(args.is_logging_enabled);

        match self.open(&args, epoch) {
            Ok(opened) => {
                *session = Some(opened);
                if self.verbose() {
                    info!(app_key = %args.app_key, epoch, "Pusher init");
                }
                Ok(())
            }
            Err(e) => {
                if self.verbose() {
                    warn!(error = %e, "Pusher init error");
                }
                Err(e)
            }
        }
    }

    /// Tear down the current client, leaving the gateway uninitialized.
    pub fn reset(&self) {
        let mut session = self.session.lock();
        self.reset_locked(&mut session);
    }

    fn reset_locked(&self, session: &mut Option<Session>) -> u64 {
        // Advance first so nothing the old client raises during teardown
        // reaches the host.
        let epoch = self.bridge.advance_epoch();
        if let Some(previous) = session.take() {
            debug!(
                channels = previous.channels.len(),
                bindings = previous.bindings.len(),
                "Releasing previous client"
            );
            previous.close();
        }
        epoch
    }

    fn open(&self, args: &InitArgs, epoch: u64) -> Result<Session, GatewayError> {
        validate_app_key(&args.app_key)?;
        let options = ClientOptions::from_init(&args.options)?;
        let delegate = Arc::new(StateReporter::new(Arc::clone(&self.bridge), epoch));
        let client = self.factory.create(&args.app_key, options, delegate)?;

        Ok(Session {
            client,
            channels: ChannelRegistry::new(),
            bindings: BindingRegistry::new(),
            epoch,
        })
    }

    /// Open the connection. No-op without a client.
    pub fn connect(&self) {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            debug!("Connect without client");
            return;
        };
        session.client.connect();
        if self.verbose() {
            info!("Pusher connect");
        }
    }

    /// Close the connection. No-op without a client.
    pub fn disconnect(&self) {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            debug!("Disconnect without client");
            return;
        };
        session.client.disconnect();
        if self.verbose() {
            info!("Pusher disconnect");
        }
    }

    /// Subscribe to a channel. No-op without a client.
    ///
    /// Re-subscribing to a registered channel first unbinds every listener
    /// recorded for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the subscription.
    pub fn subscribe(&self, channel_name: &str) -> Result<(), GatewayError> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            debug!(channel = %channel_name, "Subscribe without client");
            return Ok(());
        };

        if let Some(previous) = session.channels.get(channel_name).cloned() {
            let unbound = session.unbind_channel(channel_name, previous.as_ref());
            debug!(channel = %channel_name, unbound, "Re-subscribing channel");
        }

        let channel_type = ChannelType::from_name(channel_name);
        let handle = match channel_type {
            ChannelType::Public => session.client.subscribe(channel_name),
            ChannelType::Private => session.client.subscribe_private(channel_name),
            ChannelType::Presence => session.client.subscribe_presence(channel_name),
        };

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                session.channels.remove(channel_name);
                if self.verbose() {
                    warn!(channel = %channel_name, error = %e, "Pusher subscribe error");
                }
                return Err(e.into());
            }
        };

        session.channels.insert(channel_name, handle);
        if self.verbose() {
            info!(channel = %channel_name, kind = %channel_type, "Pusher subscribe");
        }
        Ok(())
    }

    /// Unsubscribe from a channel. No-op without a client.
    pub fn unsubscribe(&self, channel_name: &str) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            debug!(channel = %channel_name, "Unsubscribe without client");
            return;
        };

        session.client.unsubscribe(channel_name);
        if let Some(handle) = session.channels.remove(channel_name) {
            session.unbind_channel(channel_name, handle.as_ref());
        }

        if self.verbose() {
            info!(channel = %channel_name, "Pusher unsubscribe");
        }
    }

    /// Bind a listener for `event_name` on a registered channel.
    ///
    /// Any listener already bound to the same pair is unbound first, so a
    /// pair never has more than one. No-op if the channel is not
    /// registered.
    pub fn bind(&self, channel_name: &str, event_name: &str) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            debug!(channel = %channel_name, event = %event_name, "Bind without client");
            return;
        };
        let Some(handle) = session.channels.get(channel_name).cloned() else {
            debug!(channel = %channel_name, event = %event_name, "Bind on unknown channel");
            return;
        };

        session.unbind_if_bound(channel_name, event_name);

        let callback_id = handle.bind(event_name, self.event_callback(session.epoch));
        session
            .bindings
            .insert(BindingKey::new(channel_name, event_name), callback_id);

        if self.verbose() {
            info!(channel = %channel_name, event = %event_name, "Pusher bind");
        }
    }

    fn event_callback(&self, epoch: u64) -> EventCallback {
        let bridge = Arc::clone(&self.bridge);
        Box::new(move |event| {
            bridge.deliver_from(epoch, &event_message(event));
        })
    }

    /// Unbind the listener for a pair. No-op if none is bound.
    pub fn unbind(&self, channel_name: &str, event_name: &str) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return;
        };
        if session.unbind_if_bound(channel_name, event_name) && self.verbose() {
            info!(channel = %channel_name, event = %event_name, "Pusher unbind");
        }
    }

    /// Transport-assigned socket id, or `None` without a client.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        let socket_id = self.session.lock().as_ref()?.client.socket_id();
        if self.verbose() {
            debug!(socket_id = ?socket_id, "Pusher socket id");
        }
        socket_id
    }

    /// Attach the host listener, replacing any previous one.
    pub fn attach_listener(&self, sink: impl EventSink + 'static) -> SinkId {
        self.bridge.attach(sink)
    }

    /// Detach the host listener if `id` is still the attached one.
    pub fn release_listener(&self, id: SinkId) -> bool {
        self.bridge.detach_if(id)
    }

    /// Detach the host listener.
    pub fn detach_listener(&self) {
        self.bridge.detach();
    }

    /// Check if a client exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.channels.names())
            .unwrap_or_default()
    }

    /// Check if a listener is bound to a pair.
    #[must_use]
    pub fn is_bound(&self, channel_name: &str, event_name: &str) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.bindings.get(channel_name, event_name).is_some())
    }

    /// Number of bound listeners.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.bindings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{codec, AuthArgs, ConnectionState, InitOptions, StreamMessage};
    use pusher_bridge_transport::local::{LocalCall, LocalClient, LocalFactory};
    use pusher_bridge_transport::{AuthBody, ConnectionDelegate};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Harness {
        factory: Arc<LocalFactory>,
        gateway: Gateway,
        seen: Arc<Mutex<Vec<StreamMessage>>>,
    }

    impl Harness {
        fn new() -> Self {
            let factory = Arc::new(LocalFactory::new());
            let gateway = Gateway::new(factory.clone());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink_seen = Arc::clone(&seen);
            gateway.attach_listener(move |message: String| {
                sink_seen.lock().push(codec::decode(&message).unwrap());
            });
            Self {
                factory,
                gateway,
                seen,
            }
        }

        fn init(&self) -> Arc<LocalClient> {
            self.gateway.initialize(init_args()).unwrap();
            self.factory.latest().unwrap()
        }

        fn events(&self) -> Vec<StreamMessage> {
            self.seen
                .lock()
                .iter()
                .filter(|m| matches!(m, StreamMessage::Event(_)))
                .cloned()
                .collect()
        }
    }

    fn init_args() -> InitArgs {
        InitArgs {
            app_key: "app-key".into(),
            options: InitOptions::default(),
            is_logging_enabled: true,
        }
    }

    #[test]
    fn test_socket_id_before_init() {
        let harness = Harness::new();
        assert!(harness.gateway.socket_id().is_none());
        assert!(!harness.gateway.is_initialized());
    }

    #[test]
    fn test_commands_without_client_are_noops() {
        let harness = Harness::new();
        harness.gateway.connect();
        harness.gateway.disconnect();
        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        harness.gateway.unbind("room1", "message");
        harness.gateway.unsubscribe("room1");

        assert!(harness.factory.latest().is_none());
        assert!(harness.seen.lock().is_empty());
    }

    #[test]
    fn test_connect_reports_state_and_socket_id() {
        let harness = Harness::new();
        harness.init();

        harness.gateway.connect();
        assert_eq!(harness.gateway.socket_id().as_deref(), Some("123.1"));

        assert_eq!(
            *harness.seen.lock(),
            vec![
                StreamMessage::state_change(
                    ConnectionState::Disconnected,
                    ConnectionState::Connecting
                ),
                StreamMessage::state_change(
                    ConnectionState::Connecting,
                    ConnectionState::Connected
                ),
            ]
        );
    }

    #[test]
    fn test_channel_type_dispatch() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("presence-room1").unwrap();
        harness.gateway.subscribe("private-room1").unwrap();
        harness.gateway.subscribe("room1").unwrap();

        assert_eq!(
            client.calls(),
            vec![
                LocalCall::SubscribePresence("presence-room1".into()),
                LocalCall::SubscribePrivate("private-room1".into()),
                LocalCall::Subscribe("room1".into()),
            ]
        );
        assert_eq!(harness.gateway.channel_names().len(), 3);
    }

    #[test]
    fn test_bind_delivers_events() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        client.trigger("room1", "message", "{\"text\":\"hi\"}");

        assert_eq!(
            harness.events(),
            vec![StreamMessage::event("room1", "message", "{\"text\":\"hi\"}")]
        );
    }

    #[test]
    fn test_bind_on_unknown_channel_is_noop() {
        let harness = Harness::new();
        harness.init();

        harness.gateway.bind("room1", "message");
        assert!(!harness.gateway.is_bound("room1", "message"));
    }

    #[test]
    fn test_rebind_is_idempotent() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        harness.gateway.bind("room1", "message");

        let channel = client.channel("room1").unwrap();
        assert_eq!(channel.callback_count("message"), 1);
        assert_eq!(harness.gateway.binding_count(), 1);

        client.trigger("room1", "message", "once");
        assert_eq!(harness.events().len(), 1);
    }

    #[test]
    fn test_unbind_then_query() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        assert!(harness.gateway.is_bound("room1", "message"));

        harness.gateway.unbind("room1", "message");
        assert!(!harness.gateway.is_bound("room1", "message"));

        client.trigger("room1", "message", "late");
        assert!(harness.events().is_empty());

        // A second unbind finds nothing.
        harness.gateway.unbind("room1", "message");
    }

    #[test]
    fn test_resubscribe_unbinds_previous_listeners() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        harness.gateway.subscribe("room1").unwrap();

        assert_eq!(harness.gateway.binding_count(), 0);
        assert_eq!(client.channel("room1").unwrap().total_callbacks(), 0);
        assert_eq!(client.trigger("room1", "message", "x"), 0);
    }

    #[test]
    fn test_unsubscribe_removes_channel_and_bindings() {
        let harness = Harness::new();
        let client = harness.init();

        harness.gateway.subscribe("private-room1").unwrap();
        harness.gateway.bind("private-room1", "a");
        harness.gateway.unsubscribe("private-room1");

        assert!(harness.gateway.channel_names().is_empty());
        assert_eq!(harness.gateway.binding_count(), 0);
        assert!(client
            .calls()
            .contains(&LocalCall::Unsubscribe("private-room1".into())));
    }

    #[test]
    fn test_reinit_resets_everything() {
        let harness = Harness::new();
        let old = harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");
        harness.gateway.connect();
        let old_channel = old.channel("room1").unwrap();

        let new = harness.init();
        harness.seen.lock().clear();

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(harness.gateway.channel_names().is_empty());
        assert_eq!(harness.gateway.binding_count(), 0);
        assert_eq!(old_channel.total_callbacks(), 0);

        let calls = old.calls();
        assert!(calls.contains(&LocalCall::UnbindAll));
        assert!(calls.contains(&LocalCall::UnsubscribeAll));
        assert_eq!(calls.last(), Some(&LocalCall::Disconnect));

        // The old client reporting anything after the reset goes nowhere.
        old_channel.emit("message", "stale");
        old.connect();
        assert!(harness.seen.lock().is_empty());
    }

    #[test]
    fn test_in_flight_callback_is_dropped_after_reinit() {
        let harness = Harness::new();
        harness.init();

        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");

        // Hold on to the callback the gateway registered, as a transport
        // with an event already in flight would.
        let captured = harness.gateway.event_callback(harness.gateway.bridge().epoch());
        harness.init();

        captured(pusher_bridge_transport::TransportEvent::new("room1", "message", "late"));
        assert!(harness.events().is_empty());
    }

    #[test]
    fn test_invalid_init_leaves_gateway_empty() {
        let harness = Harness::new();
        let old = harness.init();
        harness.gateway.subscribe("room1").unwrap();

        let result = harness.gateway.initialize(InitArgs {
            app_key: String::new(),
            ..init_args()
        });

        assert!(matches!(
            result,
            Err(GatewayError::Config(ConfigError::EmptyAppKey))
        ));
        assert!(!harness.gateway.is_initialized());
        assert!(harness.gateway.socket_id().is_none());
        assert!(old.calls().contains(&LocalCall::UnsubscribeAll));
    }

    #[test]
    fn test_replacing_listener() {
        let harness = Harness::new();
        let client = harness.init();
        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.bind("room1", "message");

        let second = Arc::new(Mutex::new(Vec::new()));
        let sink_second = Arc::clone(&second);
        harness
            .gateway
            .attach_listener(move |message: String| sink_second.lock().push(message));

        client.trigger("room1", "message", "x");
        assert!(harness.events().is_empty());
        assert_eq!(second.lock().len(), 1);

        harness.gateway.detach_listener();
        client.trigger("room1", "message", "y");
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn test_private_subscribe_builds_json_auth_request() {
        let harness = Harness::new();
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        harness
            .gateway
            .initialize(InitArgs {
                options: InitOptions {
                    auth: Some(AuthArgs {
                        endpoint: "https://example.com/pusher/auth".into(),
                        headers,
                    }),
                    ..InitOptions::default()
                },
                ..init_args()
            })
            .unwrap();
        let client = harness.factory.latest().unwrap();

        harness.gateway.connect();
        harness.gateway.subscribe("room1").unwrap();
        harness.gateway.subscribe("private-orders").unwrap();

        let requests: Vec<_> = client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                LocalCall::Authorize(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 1);

        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.url.as_str(), "https://example.com/pusher/auth");
        assert_eq!(
            request.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(
            request.body,
            AuthBody::Json(r#"{"socket_id":"123.1","channel_name":"private-orders"}"#.into())
        );
    }

    type Gate = (mpsc::Sender<()>, mpsc::Receiver<()>);

    /// Client whose first `connect` parks until released.
    struct GatedClient {
        connected: AtomicBool,
        gate: Mutex<Option<Gate>>,
    }

    impl PusherClient for GatedClient {
        fn connect(&self) {
            let gate = self.gate.lock().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.recv();
            }
            self.connected.store(true, Ordering::SeqCst);
        }

        fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn subscribe(&self, channel_name: &str) -> Result<Arc<dyn ChannelHandle>, TransportError> {
            Err(TransportError::SubscriptionFailed {
                channel: channel_name.to_string(),
                reason: "rejected".into(),
            })
        }

        fn subscribe_private(
            &self,
            channel_name: &str,
        ) -> Result<Arc<dyn ChannelHandle>, TransportError> {
            self.subscribe(channel_name)
        }

        fn subscribe_presence(
            &self,
            channel_name: &str,
        ) -> Result<Arc<dyn ChannelHandle>, TransportError> {
            self.subscribe(channel_name)
        }

        fn unsubscribe(&self, _channel_name: &str) {}

        fn unbind_all(&self) {}

        fn unsubscribe_all(&self) {}

        fn socket_id(&self) -> Option<String> {
            None
        }
    }

    struct GatedFactory {
        gate: Mutex<Option<Gate>>,
        clients: Mutex<Vec<Arc<GatedClient>>>,
    }

    impl GatedFactory {
        fn new(gate: Option<Gate>) -> Self {
            Self {
                gate: Mutex::new(gate),
                clients: Mutex::new(Vec::new()),
            }
        }
    }

    impl ClientFactory for GatedFactory {
        fn create(
            &self,
            _app_key: &str,
            _options: ClientOptions,
            _delegate: Arc<dyn ConnectionDelegate>,
        ) -> Result<Arc<dyn PusherClient>, TransportError> {
            let client = Arc::new(GatedClient {
                connected: AtomicBool::new(false),
                gate: Mutex::new(self.gate.lock().take()),
            });
            self.clients.lock().push(Arc::clone(&client));
            Ok(client)
        }
    }

    #[test]
    fn test_connect_racing_reinit_leaves_old_client_closed() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let factory = Arc::new(GatedFactory::new(Some((entered_tx, release_rx))));
        let gateway = Gateway::new(factory.clone());
        gateway.initialize(init_args()).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| gateway.connect());
            entered_rx.recv().unwrap();

            let reinit = s.spawn(|| gateway.initialize(init_args()));
            std::thread::sleep(Duration::from_millis(20));
            release_tx.send(()).unwrap();
            reinit.join().unwrap().unwrap();
        });

        let clients = factory.clients.lock();
        assert_eq!(clients.len(), 2);
        assert!(!clients[0].connected.load(Ordering::SeqCst));
        assert!(!clients[1].connected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rejected_subscribe_is_not_registered() {
        let gateway = Gateway::new(Arc::new(GatedFactory::new(None)));
        gateway.initialize(init_args()).unwrap();

        assert!(matches!(
            gateway.subscribe("private-room1"),
            Err(GatewayError::Transport(TransportError::SubscriptionFailed { .. }))
        ));
        assert!(gateway.channel_names().is_empty());
    }
}
