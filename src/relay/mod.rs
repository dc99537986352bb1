//! The WebSocket transport around the room registry.
//!
//! Everything here is plumbing: accept a connection, upgrade it, feed its
//! frames to the per-connection [`Client`] router and tear the registry
//! state down again when the socket goes away. The relay semantics live in
//! [`registry`] and [`client`].

pub mod client;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod room;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::TypedHeader;
use futures_util::{SinkExt, StreamExt};
use headers::Origin;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, error, info};

use self::client::Client;
use self::connection::ConnectionHandle;
use self::registry::Registry;

/// Shared server state: the registry and the origin policy.
pub struct AppState {
    registry: RwLock<Registry>,
    origin_suffix: Option<String>,
}

impl AppState {
    /// `origin_suffix` is the Origin-host suffix whitelist; `None` or an
    /// empty string accepts any origin.
    pub fn new(origin_suffix: Option<String>) -> Arc<AppState> {
        Arc::new(AppState {
            registry: RwLock::new(Registry::new()),
            origin_suffix,
        })
    }
}

/// Builds the application router: a single WebSocket route.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}

/// Binds the listening socket and serves until SIGINT or SIGTERM.
///
/// A bind failure is returned to the caller; everything after a successful
/// bind runs until shutdown.
pub async fn start_ws(ip: IpAddr, port: u16, origin_suffix: Option<String>) -> io::Result<()> {
    let state = AppState::new(origin_suffix);

    let listener = TcpListener::bind((ip, port)).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

/// Whether a WebSocket upgrade passes the origin whitelist.
///
/// With no suffix configured (or a blank one) every request passes. With a
/// suffix, the `Origin` header's host must end with it; a request without
/// an `Origin` header, or with an opaque `null` one, is turned away.
fn origin_allowed(suffix: Option<&str>, origin: Option<&Origin>) -> bool {
    let Some(suffix) = suffix.filter(|suffix| !suffix.is_empty()) else {
        return true;
    };

    match origin {
        Some(origin) if !origin.is_null() => origin.hostname().ends_with(suffix),
        _ => false,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    origin: Option<TypedHeader<Origin>>,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let origin = origin.as_ref().map(|TypedHeader(origin)| origin);

    if !origin_allowed(state.origin_suffix.as_deref(), origin) {
        debug!(
            "rejecting upgrade from {addr}: origin {:?} is not whitelisted",
            origin.map(Origin::hostname)
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    debug!("upgrading connection from {addr}");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
        .into_response()
}

/// Runs one connection from upgrade to teardown.
///
/// The socket is split: a writer task drains the connection's outbound
/// queue into the sink while this task feeds inbound frames to the router.
/// When the stream ends, the registry is reconciled before the last handle
/// is dropped, so no room ever points at a dead connection.
async fn handle_socket(socket: WebSocket, who: SocketAddr, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut frames) = ConnectionHandle::new();
    let connection_id = handle.id();
    debug!("connection {connection_id} established from {who}");

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let client = Client::new(handle.clone());
    while let Some(message) = stream.next().await {
        match message {
            Ok(message) => client.handle_message(&state.registry, message).await,
            Err(err) => {
                error!("failed to read from connection {connection_id} ({who}): {err}");
                break;
            }
        }
    }

    client.handle_close(&state.registry).await;
    handle.close();
    drop(client);
    drop(handle);

    if writer.await.is_err() {
        error!("writer task for connection {connection_id} panicked");
    }
    debug!("connection {connection_id} closed");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(origin_suffix: Option<&str>) -> SocketAddr {
        let state = AppState::new(origin_suffix.map(str::to_string));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        addr
    }

    async fn connect(addr: SocketAddr) -> Socket {
        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        socket
    }

    async fn send_text(socket: &mut Socket, raw: String) {
        socket.send(WsMessage::Text(raw)).await.unwrap();
    }

    async fn next_json(socket: &mut Socket) -> Value {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn next_binary(socket: &mut Socket) -> Vec<u8> {
        match socket.next().await {
            Some(Ok(WsMessage::Binary(data))) => data,
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }

    /// The full lifecycle over real sockets: create, join, a rejected
    /// third joiner, broadcast, unicast back, and the departure notice.
    #[tokio::test]
    async fn relays_between_room_members() {
        let addr = spawn_server(None).await;

        let mut a = connect(addr).await;
        send_text(&mut a, r#"{"type":"create"}"#.to_string()).await;
        let created = next_json(&mut a).await;
        assert_eq!(created["type"], "create");
        let room_id = created["id"].as_str().unwrap().to_string();
        assert_eq!(room_id.len(), 36);

        let mut b = connect(addr).await;
        send_text(&mut b, format!(r#"{{"type":"join","id":"{room_id}"}}"#)).await;
        assert_eq!(next_json(&mut b).await, json!({"type": "join", "size": 1}));
        assert_eq!(next_json(&mut a).await, json!({"type": "join"}));

        // The default room size is 2, so a third member bounces.
        let mut c = connect(addr).await;
        send_text(&mut c, format!(r#"{{"type":"join","id":"{room_id}"}}"#)).await;
        assert_eq!(
            next_json(&mut c).await,
            json!({"type": "error", "message": "IsFull"})
        );

        a.send(WsMessage::Binary(vec![255, 0x68, 0x69]))
            .await
            .unwrap();
        assert_eq!(next_binary(&mut b).await, vec![0, 0x68, 0x69]);

        b.send(WsMessage::Binary(vec![0, 0x79, 0x6F])).await.unwrap();
        assert_eq!(next_binary(&mut a).await, vec![1, 0x79, 0x6F]);

        a.close(None).await.unwrap();
        assert_eq!(next_json(&mut b).await, json!({"type": "leave", "index": 0}));
    }

    #[tokio::test]
    async fn an_invalid_create_size_keeps_the_socket_open() {
        let addr = spawn_server(None).await;

        let mut socket = connect(addr).await;
        send_text(&mut socket, r#"{"type":"create","size":0}"#.to_string()).await;
        assert_eq!(
            next_json(&mut socket).await,
            json!({"type": "error", "message": "InvalidSize"})
        );

        // The connection is still outside any room and still usable.
        send_text(&mut socket, r#"{"type":"create"}"#.to_string()).await;
        assert_eq!(next_json(&mut socket).await["type"], "create");
    }

    #[tokio::test]
    async fn origin_suffix_admits_matching_hosts_only() {
        let addr = spawn_server(Some("example.com")).await;

        let mut allowed = format!("ws://{addr}/ws").into_client_request().unwrap();
        allowed
            .headers_mut()
            .insert("Origin", "https://app.example.com".parse().unwrap());
        assert!(tokio_tungstenite::connect_async(allowed).await.is_ok());

        let mut denied = format!("ws://{addr}/ws").into_client_request().unwrap();
        denied
            .headers_mut()
            .insert("Origin", "https://relay.example.org".parse().unwrap());
        assert!(tokio_tungstenite::connect_async(denied).await.is_err());

        // While filtering, a request without any Origin is turned away too.
        assert!(
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .is_err()
        );
    }

    #[test]
    fn origin_allowed_matches_host_suffixes() {
        let origin = Origin::try_from_parts("https", "app.example.com", None).unwrap();

        assert!(origin_allowed(None, Some(&origin)));
        assert!(origin_allowed(None, None));
        assert!(origin_allowed(Some(""), None));
        assert!(origin_allowed(Some("example.com"), Some(&origin)));
        assert!(origin_allowed(Some("app.example.com"), Some(&origin)));
        assert!(!origin_allowed(Some("example.org"), Some(&origin)));
        assert!(!origin_allowed(Some("example.com"), None));
        assert!(!origin_allowed(Some("example.com"), Some(&Origin::NULL)));
    }
}
