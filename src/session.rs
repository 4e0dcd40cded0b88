//! Call session
//!
//! A single event loop owns the room, the peer session, the captured media,
//! the detection loop and the view-model. Collaborator callbacks (signaling
//! reader, peer backend, timers) only post [`SessionEvent`]s; everything is
//! mutated from [`CallSession::process`].

use crate::capture::{CaptureError, CaptureManager, LocalMedia, MediaDevice};
use crate::config::Config;
use crate::detection::{DetectionLoop, DetectionResult};
use crate::encode::{EncodeError, EncoderConfig, JpegEncoder};
use crate::peer::{PeerConnectionManager, PeerConnector, PeerEvent, PeerState, PeerUpdate, WebRTCError};
use crate::room::{Room, RoomCoordinator, RoomError, RoomRole};
use crate::signaling::{ChannelStatus, MessageKind, SignalSink, SignalingClient, SignalingError, SignalingMessage};
use crate::view::{reduce, ConnectionStatus, Renderer, ViewEvent, ViewModel};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};

/// User actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateRoom,
    JoinRoom(String),
    StartDetection,
    StopDetection,
    Disconnect,
}

/// Reply channel for a command
pub type CommandReply = oneshot::Sender<Result<(), CallError>>;

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum SessionEvent {
    Command(Command, Option<CommandReply>),
    Signal(SignalingMessage),
    Channel(ChannelStatus),
    Peer { epoch: u64, event: PeerEvent },
    DetectionTick(u64),
    NegotiationTimeout(u64),
}

/// Command failures
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    Capture(CaptureError),
    Room(RoomError),
    Peer(WebRTCError),
    Signaling(SignalingError),
    Encode(EncodeError),
    /// Signaling channel is not connected
    NotConnected,
    /// Session has shut down
    Closed,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Capture(e) => write!(f, "{}", e),
            CallError::Room(e) => write!(f, "{}", e),
            CallError::Peer(e) => write!(f, "{}", e),
            CallError::Signaling(e) => write!(f, "{}", e),
            CallError::Encode(e) => write!(f, "{}", e),
            CallError::NotConnected => write!(f, "Signaling channel is not connected"),
            CallError::Closed => write!(f, "Call session closed"),
        }
    }
}

impl Error for CallError {}

impl From<CaptureError> for CallError {
    fn from(e: CaptureError) -> Self {
        CallError::Capture(e)
    }
}

impl From<RoomError> for CallError {
    fn from(e: RoomError) -> Self {
        CallError::Room(e)
    }
}

impl From<WebRTCError> for CallError {
    fn from(e: WebRTCError) -> Self {
        CallError::Peer(e)
    }
}

impl From<SignalingError> for CallError {
    fn from(e: SignalingError) -> Self {
        CallError::Signaling(e)
    }
}

impl From<EncodeError> for CallError {
    fn from(e: EncodeError) -> Self {
        CallError::Encode(e)
    }
}

/// Handle for driving a running session
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl CallHandle {
    pub async fn create_room(&self) -> Result<(), CallError> {
        self.command(Command::CreateRoom).await
    }

    pub async fn join_room(&self, room_id: impl Into<String>) -> Result<(), CallError> {
        self.command(Command::JoinRoom(room_id.into())).await
    }

    pub async fn start_detection(&self) -> Result<(), CallError> {
        self.command(Command::StartDetection).await
    }

    pub async fn stop_detection(&self) -> Result<(), CallError> {
        self.command(Command::StopDetection).await
    }

    pub async fn disconnect(&self) -> Result<(), CallError> {
        self.command(Command::Disconnect).await
    }

    /// Send a command and wait for its outcome
    pub async fn command(&self, command: Command) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionEvent::Command(command, Some(reply)))
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)?
    }

    /// Post an event without waiting. Returns false once the session is gone.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Route every inbound message kind and status change of `client` into the session
    pub fn bind(&self, client: &SignalingClient) {
        for kind in MessageKind::ALL {
            let tx = self.tx.clone();
            client.on_message(kind, move |message| {
                let _ = tx.send(SessionEvent::Signal(message));
            });
        }
        let tx = self.tx.clone();
        client.on_status(move |status| {
            let _ = tx.send(SessionEvent::Channel(status));
        });
    }
}

pub struct CallSession {
    config: Config,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    signals: Arc<dyn SignalSink>,
    capture: CaptureManager,
    rooms: RoomCoordinator,
    peers: PeerConnectionManager,
    detection: DetectionLoop,
    encoder: JpegEncoder,
    channel: ChannelStatus,
    view: ViewModel,
    renderer: Box<dyn Renderer>,
    dirty: bool,
    closed: bool,
}

impl CallSession {
    pub fn new(
        config: Config,
        signals: Arc<dyn SignalSink>,
        device: Arc<dyn MediaDevice>,
        connector: Arc<dyn PeerConnector>,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let peer_tx = events_tx.clone();
        let peers = PeerConnectionManager::new(
            connector,
            Arc::new(move |epoch, event| {
                let _ = peer_tx.send(SessionEvent::Peer { epoch, event });
            }),
        );

        Self {
            capture: CaptureManager::new(device, config.capture.constraints()),
            rooms: RoomCoordinator::new(),
            peers,
            detection: DetectionLoop::new(&config.detection),
            encoder: JpegEncoder::new(EncoderConfig {
                quality: config.detection.jpeg_quality,
            }),
            channel: ChannelStatus::Idle,
            view: ViewModel::new(config.detection.history_limit),
            renderer,
            dirty: true,
            closed: false,
            config,
            events_tx,
            events_rx,
            signals,
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            tx: self.events_tx.clone(),
        }
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn room(&self) -> Option<&Room> {
        self.rooms.room()
    }

    pub fn peer_state(&self) -> PeerState {
        self.peers.state()
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.capture.media()
    }

    pub fn is_detecting(&self) -> bool {
        self.detection.is_running()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run the event loop until the session is disconnected
    pub async fn run(mut self) {
        self.render();
        while let Some(event) = self.events_rx.recv().await {
            self.process(event).await;
            if self.closed {
                break;
            }
        }
        info!("Call session finished");
    }

    /// Process every event queued so far. Returns how many were processed.
    pub async fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.process(event).await;
            processed += 1;
        }
        processed
    }

    pub async fn process(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(command, reply) => {
                debug!("Command: {:?}", command);
                let result = self.execute(command).await;
                if let Err(ref e) = result {
                    warn!("Command failed: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SessionEvent::Signal(message) => self.on_signal(message).await,
            SessionEvent::Channel(status) => self.on_channel(status).await,
            SessionEvent::Peer { epoch, event } => {
                let updates = self.peers.handle_event(epoch, event).await;
                self.apply_updates(updates);
            }
            SessionEvent::DetectionTick(generation) => self.on_detection_tick(generation),
            SessionEvent::NegotiationTimeout(epoch) => {
                if let Some(remote_cleared) = self.peers.expire(epoch).await {
                    self.apply_updates(vec![PeerUpdate::Closed { remote_cleared }]);
                    self.update(ViewEvent::Notice("Connection attempt timed out".to_string()));
                }
            }
        }
        self.render();
    }

    async fn execute(&mut self, command: Command) -> Result<(), CallError> {
        if self.closed {
            return Err(CallError::Closed);
        }

        match command {
            Command::CreateRoom => {
                self.require_channel()?;
                self.ensure_media().await?;
                let message = self.rooms.request_create()?;
                self.signals.send(message);
                self.update(ViewEvent::Notice("Creating room...".to_string()));
                Ok(())
            }
            Command::JoinRoom(room_id) => {
                self.require_channel()?;
                self.ensure_media().await?;
                let message = self.rooms.request_join(&room_id)?;
                self.signals.send(message);
                self.update(ViewEvent::Notice(format!("Joining room {}...", room_id.trim())));
                Ok(())
            }
            Command::StartDetection => {
                self.require_channel()?;
                self.ensure_media().await?;
                let tx = self.events_tx.clone();
                if self.detection.start(move |generation| {
                    let _ = tx.send(SessionEvent::DetectionTick(generation));
                }) {
                    self.update(ViewEvent::DetectionActive(true));
                }
                Ok(())
            }
            Command::StopDetection => {
                if self.detection.stop() {
                    self.update(ViewEvent::DetectionActive(false));
                }
                Ok(())
            }
            Command::Disconnect => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::RoomCreated { room_id } => {
                if let Some(room) = self.rooms.on_room_created(room_id) {
                    self.update(ViewEvent::RoomAssigned(room.id));
                    self.update(ViewEvent::Notice("Waiting for a peer to join".to_string()));
                }
            }
            SignalingMessage::RoomJoined { room_id } => {
                if let Some(room) = self.rooms.on_room_joined(room_id) {
                    self.update(ViewEvent::RoomAssigned(room.id.clone()));
                    self.begin_offer(&room.id).await;
                }
            }
            SignalingMessage::Offer { sdp, room_id } => {
                let Some(room) = self.negotiation_room(MessageKind::Offer, room_id.as_deref()) else {
                    return;
                };
                if room.role != RoomRole::Initiator {
                    warn!("Ignoring offer: only the room creator answers");
                    return;
                }
                self.answer_offer(&room.id, &sdp).await;
            }
            SignalingMessage::Answer { sdp, room_id } => {
                let Some(room) = self.negotiation_room(MessageKind::Answer, room_id.as_deref()) else {
                    return;
                };
                if room.role != RoomRole::Joiner {
                    warn!("Ignoring answer: the room creator never offers");
                    return;
                }
                if let Err(e) = self.peers.handle_answer(&sdp).await {
                    warn!("Negotiation failure applying answer: {}", e);
                }
                self.update(ViewEvent::Call(self.peers.state()));
            }
            SignalingMessage::IceCandidate { candidate, room_id } => {
                if self.negotiation_room(MessageKind::IceCandidate, room_id.as_deref()).is_none() {
                    return;
                }
                match self.peers.handle_remote_candidate(candidate).await {
                    Ok(disposition) => debug!("Remote candidate {:?}", disposition),
                    Err(e) => warn!("Negotiation failure applying candidate: {}", e),
                }
            }
            SignalingMessage::PeerDisconnected {} => {
                info!("Remote peer left the room");
                let remote_cleared = self.peers.close("peer disconnected").await;
                if remote_cleared {
                    self.update(ViewEvent::RemoteStream(None));
                }
                self.update(ViewEvent::Call(self.peers.state()));
                self.update(ViewEvent::Notice("Peer disconnected".to_string()));
            }
            SignalingMessage::DetectionResult {
                label,
                confidence,
                request_id,
            } => {
                match request_id {
                    // Room copy of the peer's result
                    None => debug!("Peer detection: {} ({:.2})", label, confidence),
                    Some(_) if !self.detection.accepts(request_id) => {
                        debug!("Discarding detection result for request {:?}", request_id);
                        return;
                    }
                    Some(_) => {}
                }
                self.update(ViewEvent::DetectionResult {
                    result: DetectionResult::new(label, confidence),
                    at: SystemTime::now(),
                });
            }
            SignalingMessage::DetectionError { error, request_id } => {
                if !self.detection.accepts(request_id) {
                    debug!("Discarding detection error for request {:?}", request_id);
                    return;
                }
                warn!("Detection error: {}", error);
                self.update(ViewEvent::DetectionError(error));
            }
            SignalingMessage::Error { message } => {
                warn!("Server error: {}", message);
                self.rooms.on_rejected(&message);
                self.update(ViewEvent::Alert(message));
            }
            other => debug!("Ignoring {} message from server", other.kind()),
        }
    }

    async fn on_channel(&mut self, status: ChannelStatus) {
        let previous = std::mem::replace(&mut self.channel, status);
        if previous == status {
            return;
        }
        info!("Signaling channel: {:?}", status);

        match status {
            ChannelStatus::Idle => {}
            ChannelStatus::Connecting => self.update(ViewEvent::Connection(ConnectionStatus::Connecting)),
            ChannelStatus::Connected => self.update(ViewEvent::Connection(ConnectionStatus::Connected)),
            ChannelStatus::Disconnected | ChannelStatus::GaveUp | ChannelStatus::Closed => {
                self.on_channel_lost().await;
                let shown = if status == ChannelStatus::GaveUp {
                    ConnectionStatus::Offline
                } else {
                    ConnectionStatus::Disconnected
                };
                self.update(ViewEvent::Connection(shown));
            }
        }
    }

    async fn on_channel_lost(&mut self) {
        if self.detection.stop() {
            self.update(ViewEvent::DetectionActive(false));
        }
        if self.peers.close("signaling channel lost").await {
            self.update(ViewEvent::RemoteStream(None));
        }
        self.update(ViewEvent::Call(self.peers.state()));
        // The server forgets departed members, so the room is gone too
        if self.rooms.leave().is_some() {
            self.update(ViewEvent::RoomCleared);
        }
        self.rooms.on_rejected("signaling channel lost");
    }

    fn on_detection_tick(&mut self, generation: u64) {
        let Some(request_id) = self.detection.next_request(generation) else {
            return;
        };
        let Some(frame) = self.capture.media().and_then(|media| media.snapshot()) else {
            debug!("No frame available for detection request {}", request_id);
            return;
        };

        let image = match self.encoder.encode_data_url(&frame) {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to encode detection frame: {}", e);
                return;
            }
        };

        self.signals.send(SignalingMessage::DetectSign {
            image,
            request_id: Some(request_id),
            room_id: self.rooms.room().map(|room| room.id.clone()),
        });
    }

    async fn begin_offer(&mut self, room_id: &str) {
        let media = match self.ensure_media().await {
            Ok(media) => media,
            Err(e) => {
                warn!("Cannot negotiate without local media: {}", e);
                return;
            }
        };

        let result = self.peers.start_offer(room_id, &media).await;
        self.after_negotiation_step(result);
    }

    async fn answer_offer(&mut self, room_id: &str, sdp: &str) {
        let media = match self.ensure_media().await {
            Ok(media) => media,
            Err(e) => {
                warn!("Cannot answer without local media: {}", e);
                return;
            }
        };

        let previous_epoch = self.peers.epoch();
        let result = self.peers.handle_offer(room_id, &media, sdp).await;
        if result.is_err() && self.peers.epoch() != previous_epoch {
            // The failed session stays alive; the timeout reaps it
            if let Some(epoch) = self.peers.epoch() {
                self.schedule_timeout(epoch);
            }
        }
        self.after_negotiation_step(result);
    }

    fn after_negotiation_step(&mut self, result: Result<SignalingMessage, WebRTCError>) {
        match result {
            Ok(message) => {
                self.signals.send(message);
                if let Some(epoch) = self.peers.epoch() {
                    self.schedule_timeout(epoch);
                }
            }
            Err(e) => {
                warn!("Negotiation failure: {}", e);
                self.update(ViewEvent::Notice(format!("Negotiation failed: {}", e)));
            }
        }
        self.update(ViewEvent::Call(self.peers.state()));
    }

    fn apply_updates(&mut self, updates: Vec<PeerUpdate>) {
        if updates.is_empty() {
            return;
        }
        for update in updates {
            match update {
                PeerUpdate::SendSignal(message) => self.signals.send(message),
                PeerUpdate::RemoteStreamBound(stream_id) => {
                    info!("Remote stream {} bound", stream_id);
                    self.update(ViewEvent::RemoteStream(Some(stream_id)));
                }
                PeerUpdate::Connection(state) => debug!("Peer transport {:?}", state),
                PeerUpdate::Closed { remote_cleared } => {
                    if remote_cleared {
                        self.update(ViewEvent::RemoteStream(None));
                    }
                    self.update(ViewEvent::Notice("Call ended".to_string()));
                }
            }
        }
        self.update(ViewEvent::Call(self.peers.state()));
    }

    fn schedule_timeout(&self, epoch: u64) {
        let tx = self.events_tx.clone();
        let timeout = self.config.webrtc.negotiation_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(SessionEvent::NegotiationTimeout(epoch));
        });
    }

    /// Room of an inbound negotiation message, or `None` (logged) when the
    /// message does not belong to the active room
    fn negotiation_room(&self, kind: MessageKind, room_id: Option<&str>) -> Option<Room> {
        match self.rooms.check_context(room_id) {
            Ok(room) => Some(room.clone()),
            Err(e) => {
                warn!("Ignoring {} message: {}", kind, e);
                None
            }
        }
    }

    async fn ensure_media(&mut self) -> Result<LocalMedia, CallError> {
        match self.capture.acquire().await {
            Ok(media) => {
                if self.view.local_stream.as_deref() != Some(media.stream_id()) {
                    self.update(ViewEvent::LocalStream(Some(media.stream_id().to_string())));
                }
                Ok(media)
            }
            Err(e) => {
                self.update(ViewEvent::Alert(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn require_channel(&self) -> Result<(), CallError> {
        if self.channel == ChannelStatus::Connected {
            Ok(())
        } else {
            Err(CallError::NotConnected)
        }
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        info!("Shutting down call session");

        if self.detection.stop() {
            self.update(ViewEvent::DetectionActive(false));
        }
        if self.peers.close("shutdown").await {
            self.update(ViewEvent::RemoteStream(None));
        }
        self.update(ViewEvent::Call(self.peers.state()));
        if self.capture.release() {
            self.update(ViewEvent::LocalStream(None));
        }
        if self.rooms.leave().is_some() {
            self.update(ViewEvent::RoomCleared);
        }
        self.signals.close();
        self.channel = ChannelStatus::Closed;
        self.update(ViewEvent::Connection(ConnectionStatus::Disconnected));
        self.closed = true;
    }

    fn update(&mut self, event: ViewEvent) {
        reduce(&mut self.view, event);
        self.dirty = true;
    }

    fn render(&mut self) {
        if self.dirty {
            self.renderer.render(&self.view);
            self.dirty = false;
        }
    }
}
