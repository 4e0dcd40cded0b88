//! View-model and renderers
//!
//! The call session never touches a rendering surface. It emits
//! [`ViewEvent`]s that [`reduce`] folds into a [`ViewModel`]; a [`Renderer`]
//! consumes the resulting model.

use crate::detection::{DetectionHistory, DetectionResult};
use crate::peer::PeerState;
use log::{info, warn};
use std::time::SystemTime;

/// Signaling connection as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnection budget spent
    Offline,
}

/// Content of the detection result pane
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPane {
    Idle,
    Result { label: String, confidence: f32 },
    Error(String),
}

impl ResultPane {
    /// One-decimal percentage, e.g. `92.0%`
    pub fn confidence_text(&self) -> Option<String> {
        match self {
            ResultPane::Result { confidence, .. } => Some(format!("{:.1}%", confidence * 100.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub connection: ConnectionStatus,
    /// `Room ID: <id>` once a room is established
    pub room_label: Option<String>,
    /// Local stream bound to the preview surface
    pub local_stream: Option<String>,
    /// Remote stream bound to the remote surface
    pub remote_stream: Option<String>,
    pub call: PeerState,
    pub detection_active: bool,
    pub result: ResultPane,
    pub history: DetectionHistory,
    /// Blocking notice the user must acknowledge
    pub alert: Option<String>,
    /// Transient status line
    pub notice: Option<String>,
}

impl ViewModel {
    pub fn new(history_limit: usize) -> Self {
        Self {
            connection: ConnectionStatus::Connecting,
            room_label: None,
            local_stream: None,
            remote_stream: None,
            call: PeerState::Idle,
            detection_active: false,
            result: ResultPane::Idle,
            history: DetectionHistory::new(history_limit),
            alert: None,
            notice: None,
        }
    }

    pub fn can_start_detection(&self) -> bool {
        self.connection == ConnectionStatus::Connected && !self.detection_active
    }

    pub fn can_stop_detection(&self) -> bool {
        self.connection == ConnectionStatus::Connected && self.detection_active
    }
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new(10)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Connection(ConnectionStatus),
    RoomAssigned(String),
    RoomCleared,
    LocalStream(Option<String>),
    RemoteStream(Option<String>),
    Call(PeerState),
    DetectionActive(bool),
    DetectionResult { result: DetectionResult, at: SystemTime },
    DetectionError(String),
    Alert(String),
    Notice(String),
}

/// Fold one event into the view-model
pub fn reduce(view: &mut ViewModel, event: ViewEvent) {
    match event {
        ViewEvent::Connection(status) => view.connection = status,
        ViewEvent::RoomAssigned(id) => view.room_label = Some(format!("Room ID: {}", id)),
        ViewEvent::RoomCleared => view.room_label = None,
        ViewEvent::LocalStream(stream) => view.local_stream = stream,
        ViewEvent::RemoteStream(stream) => view.remote_stream = stream,
        ViewEvent::Call(state) => view.call = state,
        ViewEvent::DetectionActive(active) => view.detection_active = active,
        ViewEvent::DetectionResult { result, at } => {
            view.history.push(&result, at);
            view.result = ResultPane::Result {
                label: result.label,
                confidence: result.confidence,
            };
        }
        ViewEvent::DetectionError(message) => view.result = ResultPane::Error(message),
        ViewEvent::Alert(message) => view.alert = Some(message),
        ViewEvent::Notice(message) => view.notice = Some(message),
    }
}

/// Rendering collaborator
pub trait Renderer: Send {
    fn render(&mut self, view: &ViewModel);
}

/// Renderer that logs what changed
#[derive(Default)]
pub struct LogRenderer {
    last: Option<ViewModel>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, view: &ViewModel) {
        let last = self.last.take().unwrap_or_default();

        if view.connection != last.connection {
            info!("Connection: {:?}", view.connection);
        }
        if view.room_label != last.room_label {
            match view.room_label {
                Some(ref label) => info!("{}", label),
                None => info!("Room cleared"),
            }
        }
        if view.local_stream != last.local_stream {
            info!("Local preview: {:?}", view.local_stream);
        }
        if view.remote_stream != last.remote_stream {
            info!("Remote video: {:?}", view.remote_stream);
        }
        if view.call != last.call {
            info!("Call: {:?}", view.call);
        }
        if view.detection_active != last.detection_active {
            info!("Detection: {}", if view.detection_active { "Active" } else { "Inactive" });
        }
        if view.result != last.result {
            match view.result {
                ResultPane::Result { ref label, .. } => {
                    info!("Detected {} ({})", label, view.result.confidence_text().unwrap_or_default())
                }
                ResultPane::Error(ref message) => warn!("Detection error: {}", message),
                ResultPane::Idle => {}
            }
        }
        if view.alert != last.alert {
            if let Some(ref alert) = view.alert {
                warn!("ALERT: {}", alert);
            }
        }
        if view.notice != last.notice {
            if let Some(ref notice) = view.notice {
                info!("{}", notice);
            }
        }

        self.last = Some(view.clone());
    }
}
