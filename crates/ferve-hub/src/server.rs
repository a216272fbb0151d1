use crate::{
    config::HubConfig,
    hub::Hub,
    registry::Connection,
    router::{log_msg, MessageRouter},
    runner::CommandRunner,
    services::{projects::ProjectRegistry, Services},
};
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use ferve_core::{protocol::OutboundMsg, LogSource};
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::{future::Future, io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<HubConfig>,
}

impl AppState {
    pub fn new(config: &HubConfig, registry: ProjectRegistry) -> Self {
        let hub = Arc::new(Hub::new());
        let services = Services::new(
            CommandRunner::new(config.command_timeout),
            registry,
            config.downloads_dir.clone(),
            &config.editor,
        );
        let router = MessageRouter::new(hub.clone(), services, config.debug);
        Self {
            hub,
            router: Arc::new(router),
            config: Arc::new(config.clone()),
        }
    }
}

/// The two informational frames every client sees before anything else.
pub fn greetings() -> [OutboundMsg; 2] {
    [
        log_msg("Connected to Ferve Labs Core", LogSource::System),
        log_msg(
            format!(
                "System ready. ferve-hub {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            LogSource::System,
        ),
    ]
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        warn!(event = "remote_refused", remote = %addr);
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(state, socket, addr))
}

async fn handle_socket(state: AppState, socket: WebSocket, remote: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.queue_capacity);
    let conn_id = state.hub.next_conn_id();

    let write_timeout = state.config.write_timeout;
    let writer_id = conn_id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            match tokio::time::timeout(write_timeout, ws_sender.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(event = "write_error", conn_id = %writer_id, error = %err);
                    return;
                }
                Err(_) => {
                    warn!(event = "write_timeout", conn_id = %writer_id);
                    return;
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let conn = Arc::new(Connection::new(conn_id, tx));
    for greeting in greetings() {
        if conn.send(&greeting).await.is_err() {
            return;
        }
    }
    info!(event = "client_accepted", conn_id = %conn.conn_id(), remote = %remote);
    let membership = state.hub.join(conn.clone()).await;

    let mut reason = "disconnect";
    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "read_error", conn_id = %conn.conn_id(), error = %err);
                reason = "read_error";
                break;
            }
        };
        let data = match msg {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(_) => {
                info!(event = "client_close", conn_id = %conn.conn_id());
                reason = "close";
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let routed = AssertUnwindSafe(state.router.route(&conn, &data))
            .catch_unwind()
            .await;
        if routed.is_err() {
            error!(event = "route_panic", conn_id = %conn.conn_id());
            reason = "route_panic";
            break;
        }
    }

    membership.leave(reason).await;
    drop(conn);
    let _ = write_task.await;
}
