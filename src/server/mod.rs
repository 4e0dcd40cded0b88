//! Rendezvous server
//!
//! Serves the signaling WebSocket on `/ws` (rooms, negotiation relay,
//! classification requests) and a `/health` probe.

pub mod detect;
pub mod hub;
pub mod rooms;

pub use detect::{load_class_names, Classifier, DetectError, Detector, Tensor};
pub use hub::{Delivery, Hub};
pub use rooms::{ConnId, RoomRegistry};

use crate::config::ServerConfig;
use crate::signaling::SignalingMessage;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// State shared by all connections
pub struct ServerState {
    hub: Mutex<Hub>,
    detector: Detector,
    connections: Mutex<HashMap<ConnId, mpsc::UnboundedSender<String>>>,
    next_conn: AtomicU64,
}

impl ServerState {
    pub fn new(detector: Detector) -> Self {
        Self {
            hub: Mutex::new(Hub::new(detector.clone())),
            detector,
            connections: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    fn register(&self, tx: mpsc::UnboundedSender<String>) -> ConnId {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(conn, tx);
        conn
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        let connections = self.connections.lock();
        for delivery in deliveries {
            let Some(tx) = connections.get(&delivery.to) else {
                debug!("Dropping {} for closed conn {}", delivery.message.kind(), delivery.to);
                continue;
            };
            match delivery.message.to_json() {
                Ok(text) => {
                    let _ = tx.send(text);
                }
                Err(e) => error!("Failed to encode {}: {}", delivery.message.kind(), e),
            }
        }
    }

    fn unregister(&self, conn: ConnId) {
        self.connections.lock().remove(&conn);
        let deliveries = self.hub.lock().disconnect(conn);
        self.deliver(deliveries);
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the rendezvous server until the listener fails
pub async fn run_server(config: &ServerConfig, detector: Detector) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, detector).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, detector: Detector) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState::new(detector));
    info!("Rendezvous server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> String {
    let rooms = state.hub.lock().rooms().len();
    let connections = state.connections.lock().len();
    format!(
        "OK rooms={} connections={} model_loaded={}",
        rooms,
        connections,
        state.detector.is_loaded()
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = state.register(tx);
    info!("Signaling connection {} established", conn);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let text_str: &str = text.as_str();
                match SignalingMessage::from_json(text_str) {
                    Ok(message) => handle_message(&state, conn, message),
                    Err(e) => warn!("Invalid signaling message from conn {}: {}", conn, e),
                }
            }
            Ok(Message::Binary(_)) => {
                debug!("Received binary message on signaling channel");
            }
            Ok(Message::Close(_)) => {
                info!("Signaling connection {} closed", conn);
                break;
            }
            Err(e) => {
                error!("WebSocket error on conn {}: {}", conn, e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    state.unregister(conn);
    info!("Signaling connection {} finished", conn);
}

fn handle_message(state: &Arc<ServerState>, conn: ConnId, message: SignalingMessage) {
    match message {
        // Classification is CPU-bound; keep it off the reader
        SignalingMessage::DetectSign {
            image,
            request_id,
            room_id,
        } => {
            let state = state.clone();
            tokio::spawn(async move {
                let detector = state.detector.clone();
                let reply = tokio::task::spawn_blocking(move || detector.respond(&image, request_id)).await;
                match reply {
                    Ok(reply) => {
                        let deliveries = state.hub.lock().route_detection(conn, room_id.as_deref(), reply);
                        state.deliver(deliveries);
                    }
                    Err(e) => error!("Detection task failed: {}", e),
                }
            });
        }
        message => {
            let deliveries = state.hub.lock().handle(conn, message);
            state.deliver(deliveries);
        }
    }
}
