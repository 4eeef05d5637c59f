//! Host surface for the bridge server.
//!
//! A host drives the gateway over one WebSocket. Text frames carry
//! requests and responses, and stream messages are pushed on the same
//! socket. Only one host listens at a time: a new session replaces the
//! previous listener.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::metrics::{self, HostSessionGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use pusher_bridge_core::{channel_sink, Gateway};
use pusher_bridge_transport::LocalFactory;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Factory of the in-memory transport behind the gateway.
    pub factory: Arc<LocalFactory>,
    /// Command router, owning the gateway all hosts drive.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let factory = Arc::new(LocalFactory::with_socket_prefix(
            config.transport.socket_prefix.clone(),
        ));
        let gateway = Arc::new(Gateway::new(factory.clone()));
        let dispatcher = Dispatcher::new(gateway, config.gateway.error_policy);

        Self {
            factory,
            dispatcher,
            config,
        }
    }
}

/// A command frame sent by the host.
#[derive(Debug, Deserialize)]
pub struct HostRequest {
    /// Correlation id echoed in the response.
    pub id: u64,
    /// Command method.
    pub method: String,
    /// Raw command argument.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Body of `POST /trigger`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Target channel.
    pub channel: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: String,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/trigger", post(trigger_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Bridge server listening on {}", addr);
    info!(
        "Host endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Gateway snapshot.
async fn state_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state_snapshot(&state))
}

/// Inject an event into the current transport client.
async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerRequest>,
) -> impl IntoResponse {
    let (status, body) = trigger(&state, &request);
    (status, Json(body))
}

fn trigger(state: &AppState, request: &TriggerRequest) -> (StatusCode, Value) {
    // The factory still holds a torn-down client after a failed init.
    let client = state
        .factory
        .latest()
        .filter(|_| state.dispatcher.gateway().is_initialized());
    let Some(client) = client else {
        return (
            StatusCode::CONFLICT,
            json!({ "error": "gateway is not initialized" }),
        );
    };

    let recipients = client.trigger(&request.channel, &request.event, &request.data);
    metrics::record_trigger();
    debug!(
        channel = %request.channel,
        event = %request.event,
        recipients,
        "Triggered event"
    );

    (StatusCode::OK, json!({ "recipients": recipients }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle one host session.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = HostSessionGuard::new();

    let (sink, mut stream_rx) = channel_sink();
    let listener = state.dispatcher.gateway().attach_listener(sink);
    debug!("Host session attached");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            Some(encoded) = stream_rx.recv() => {
                metrics::record_stream_message();
                if sender.send(Message::Text(stream_frame(&encoded))).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = respond(&state.dispatcher, &text);
                        if sender.send(Message::Text(response)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring binary frame from host");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!("Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // A newer session may have replaced this listener already.
    let released = state.dispatcher.gateway().release_listener(listener);
    debug!(released, "Host session ended");
}

/// Wrap an encoded envelope in a stream frame.
fn stream_frame(encoded: &str) -> String {
    format!(r#"{{"stream":{encoded}}}"#)
}

/// Run one request frame and build its response frame.
fn respond(dispatcher: &Dispatcher, text: &str) -> String {
    let request: HostRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed host request");
            return json!({ "id": Value::Null, "error": e.to_string() }).to_string();
        }
    };

    match dispatcher.handle(&request.method, request.arguments.as_deref()) {
        Ok(result) => json!({ "id": request.id, "result": result }),
        Err(e) => json!({ "id": request.id, "error": e.to_string() }),
    }
    .to_string()
}

fn state_snapshot(state: &AppState) -> Value {
    let gateway = state.dispatcher.gateway();
    let stats = gateway.bridge().stats();
    json!({
        "errorPolicy": state.config.gateway.error_policy,
        "initialized": gateway.is_initialized(),
        "socketId": gateway.socket_id(),
        "channels": gateway.channel_names(),
        "bindings": gateway.binding_count(),
        "listener": gateway.bridge().is_attached(),
        "delivery": {
            "delivered": stats.delivered,
            "unattended": stats.unattended,
            "stale": stats.stale,
            "failed": stats.failed,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ErrorPolicy;
    use bridge_protocol::{codec, StreamMessage};

    fn app_state(policy: ErrorPolicy) -> AppState {
        let mut config = Config::default();
        config.gateway.error_policy = policy;
        AppState::new(config)
    }

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_stream_frame_wraps_envelope() {
        let encoded = codec::encode(&StreamMessage::event("room", "msg", "hi")).unwrap();
        let frame = parse(&stream_frame(&encoded));
        assert_eq!(frame["stream"]["event"]["channel"], "room");
        assert!(frame["stream"]["connectionStateChange"].is_null());
    }

    #[test]
    fn test_respond_success_and_null_result() {
        let state = app_state(ErrorPolicy::Report);

        let init = respond(
            &state.dispatcher,
            r#"{"id":1,"method":"init","arguments":"{\"appKey\":\"key\"}"}"#,
        );
        assert_eq!(parse(&init), json!({ "id": 1, "result": null }));

        let socket = respond(&state.dispatcher, r#"{"id":2,"method":"getSocketId"}"#);
        assert_eq!(parse(&socket), json!({ "id": 2, "result": null }));

        respond(&state.dispatcher, r#"{"id":3,"method":"connect"}"#);
        let socket = respond(&state.dispatcher, r#"{"id":4,"method":"getSocketId"}"#);
        assert_eq!(parse(&socket), json!({ "id": 4, "result": "123.1" }));
    }

    #[test]
    fn test_respond_reports_errors() {
        let state = app_state(ErrorPolicy::Silent);

        let unknown = parse(&respond(&state.dispatcher, r#"{"id":7,"method":"nope"}"#));
        assert_eq!(unknown["id"], 7);
        assert!(unknown["error"].as_str().unwrap().contains("nope"));

        let malformed = parse(&respond(&state.dispatcher, "not a frame"));
        assert!(malformed["id"].is_null());
        assert!(malformed["error"].is_string());
    }

    #[test]
    fn test_state_snapshot() {
        let state = app_state(ErrorPolicy::Report);
        assert_eq!(state_snapshot(&state)["initialized"], false);

        respond(
            &state.dispatcher,
            r#"{"id":1,"method":"init","arguments":"{\"appKey\":\"key\"}"}"#,
        );
        respond(
            &state.dispatcher,
            r#"{"id":2,"method":"subscribe","arguments":"news"}"#,
        );

        let snapshot = state_snapshot(&state);
        assert_eq!(snapshot["errorPolicy"], "report");
        assert_eq!(snapshot["initialized"], true);
        assert_eq!(snapshot["channels"], json!(["news"]));
        assert_eq!(snapshot["bindings"], 0);
        assert_eq!(snapshot["delivery"]["stale"], 0);
    }

    fn trigger_request() -> TriggerRequest {
        TriggerRequest {
            channel: "news".into(),
            event: "update".into(),
            data: "{}".into(),
        }
    }

    #[test]
    fn test_trigger_requires_initialized_gateway() {
        let state = app_state(ErrorPolicy::Silent);
        assert_eq!(trigger(&state, &trigger_request()).0, StatusCode::CONFLICT);

        respond(
            &state.dispatcher,
            r#"{"id":1,"method":"init","arguments":"{\"appKey\":\"key\"}"}"#,
        );
        respond(
            &state.dispatcher,
            r#"{"id":2,"method":"subscribe","arguments":"news"}"#,
        );
        let (status, body) = trigger(&state, &trigger_request());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recipients"], 0);

        // A failed init tears the client down; triggering must not reach it.
        respond(
            &state.dispatcher,
            r#"{"id":3,"method":"init","arguments":"{\"appKey\":\"\"}"}"#,
        );
        assert!(state.factory.latest().is_some());
        assert_eq!(trigger(&state, &trigger_request()).0, StatusCode::CONFLICT);
    }

    #[test]
    fn test_release_listener_keeps_newer_session() {
        let state = app_state(ErrorPolicy::Report);
        let gateway = state.dispatcher.gateway();

        let (first, _first_rx) = channel_sink();
        let first = gateway.attach_listener(first);
        let (second, _second_rx) = channel_sink();
        let second = gateway.attach_listener(second);

        assert!(!gateway.release_listener(first));
        assert!(gateway.bridge().is_attached());
        assert!(gateway.release_listener(second));
        assert!(!gateway.bridge().is_attached());
    }

    #[tokio::test]
    async fn test_triggered_event_reaches_listener() {
        let state = app_state(ErrorPolicy::Report);
        let (sink, mut rx) = channel_sink();
        state.dispatcher.gateway().attach_listener(sink);

        respond(
            &state.dispatcher,
            r#"{"id":1,"method":"init","arguments":"{\"appKey\":\"key\"}"}"#,
        );
        respond(
            &state.dispatcher,
            r#"{"id":2,"method":"subscribe","arguments":"news"}"#,
        );
        respond(
            &state.dispatcher,
            r#"{"id":3,"method":"bind","arguments":"{\"channelName\":\"news\",\"eventName\":\"update\"}"}"#,
        );

        let client = state.factory.latest().unwrap();
        assert_eq!(client.trigger("news", "update", "{}"), 1);

        let encoded = rx.recv().await.unwrap();
        assert_eq!(
            codec::decode(&encoded).unwrap(),
            StreamMessage::event("news", "update", "{}")
        );
    }
}
