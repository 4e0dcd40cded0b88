//! Two call sessions negotiating through the rendezvous hub

use async_trait::async_trait;
use parking_lot::Mutex;
use signbridge::capture::{LocalMedia, TestPatternDevice, TrackKind};
use signbridge::peer::{
    ConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerLink, PeerState, SdpKind, WebRTCError,
};
use signbridge::server::{ConnId, Detector, Hub};
use signbridge::session::{CallHandle, CallSession, SessionEvent};
use signbridge::signaling::{ChannelStatus, IceCandidate, MessageKind, SignalSink, SignalingMessage};
use signbridge::view::{Renderer, ViewModel};
use signbridge::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Counts signaling traffic by kind
#[derive(Default)]
struct Traffic(Mutex<HashMap<MessageKind, usize>>);

impl Traffic {
    fn count(&self, kind: MessageKind) -> usize {
        self.0.lock().get(&kind).copied().unwrap_or(0)
    }
}

/// In-process stand-in for the WebSocket: routes through the hub
struct Relay {
    hub: Mutex<Hub>,
    sessions: Mutex<HashMap<ConnId, CallHandle>>,
    traffic: Traffic,
}

impl Relay {
    fn route(&self, from: ConnId, message: SignalingMessage) {
        *self.traffic.0.lock().entry(message.kind()).or_insert(0) += 1;
        let deliveries = self.hub.lock().handle(from, message);
        let sessions = self.sessions.lock();
        for delivery in deliveries {
            if let Some(handle) = sessions.get(&delivery.to) {
                handle.post(SessionEvent::Signal(delivery.message));
            }
        }
    }
}

struct RelaySink {
    conn: ConnId,
    relay: Arc<Relay>,
}

impl SignalSink for RelaySink {
    fn send(&self, message: SignalingMessage) {
        self.relay.route(self.conn, message);
    }
}

/// Peer backend that reports a connection once both descriptions are set
struct LoopbackConnector;

struct LoopbackLink {
    events: PeerEventSink,
    local_set: Mutex<bool>,
    remote_set: Mutex<bool>,
}

impl LoopbackLink {
    fn maybe_connect(&self) {
        if *self.local_set.lock() && *self.remote_set.lock() {
            self.events.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:1 1 udp 2122260223 127.0.0.1 {} typ host",
                40000 + self.events.epoch()
            ))));
            self.events.emit(PeerEvent::RemoteTrack {
                stream_id: "remote-stream".to_string(),
                track_id: "remote-video".to_string(),
                kind: TrackKind::Video,
            });
            self.events.emit(PeerEvent::StateChanged(ConnectionState::Connecting));
            self.events.emit(PeerEvent::StateChanged(ConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn connect(&self, _media: &LocalMedia, events: PeerEventSink) -> Result<Box<dyn PeerLink>, WebRTCError> {
        Ok(Box::new(LoopbackLink {
            events,
            local_set: Mutex::new(false),
            remote_set: Mutex::new(false),
        }))
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn create_offer(&self) -> Result<String, WebRTCError> {
        *self.local_set.lock() = true;
        self.maybe_connect();
        Ok("v=0 offer".to_string())
    }

    async fn create_answer(&self) -> Result<String, WebRTCError> {
        *self.local_set.lock() = true;
        self.maybe_connect();
        Ok("v=0 answer".to_string())
    }

    async fn set_remote_description(&self, _kind: SdpKind, _sdp: &str) -> Result<(), WebRTCError> {
        *self.remote_set.lock() = true;
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<(), WebRTCError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        Ok(())
    }
}

struct WatchRenderer(watch::Sender<ViewModel>);

impl Renderer for WatchRenderer {
    fn render(&mut self, view: &ViewModel) {
        self.0.send_replace(view.clone());
    }
}

struct Participant {
    handle: CallHandle,
    view: watch::Receiver<ViewModel>,
}

fn spawn_participant(relay: &Arc<Relay>, conn: ConnId) -> Participant {
    let (tx, view) = watch::channel(ViewModel::default());
    let session = CallSession::new(
        Config::default(),
        Arc::new(RelaySink {
            conn,
            relay: relay.clone(),
        }),
        Arc::new(TestPatternDevice::new()),
        Arc::new(LoopbackConnector),
        Box::new(WatchRenderer(tx)),
    );
    let handle = session.handle();
    relay.sessions.lock().insert(conn, handle.clone());
    tokio::spawn(session.run());
    handle.post(SessionEvent::Channel(ChannelStatus::Connected));
    Participant { handle, view }
}

async fn wait_for(view: &mut watch::Receiver<ViewModel>, what: impl Fn(&ViewModel) -> bool) -> ViewModel {
    tokio::time::timeout(Duration::from_secs(5), view.wait_for(|v| what(v)))
        .await
        .expect("view never reached the expected state")
        .expect("session ended")
        .clone()
}

#[tokio::test]
async fn create_join_negotiate_connect() {
    let relay = Arc::new(Relay {
        hub: Mutex::new(Hub::new(Detector::unloaded(Vec::new()))),
        sessions: Mutex::new(HashMap::new()),
        traffic: Traffic::default(),
    });

    let mut alice = spawn_participant(&relay, 1);
    let mut bob = spawn_participant(&relay, 2);

    alice.handle.create_room().await.unwrap();
    let view = wait_for(&mut alice.view, |v| v.room_label.is_some()).await;
    let room_id = view
        .room_label
        .as_deref()
        .and_then(|label| label.strip_prefix("Room ID: "))
        .unwrap()
        .to_string();
    assert_eq!(room_id.len(), 8);

    bob.handle.join_room(room_id.clone()).await.unwrap();

    let alice_view = wait_for(&mut alice.view, |v| v.call == PeerState::Connected).await;
    let bob_view = wait_for(&mut bob.view, |v| v.call == PeerState::Connected).await;

    assert_eq!(alice_view.remote_stream.as_deref(), Some("remote-stream"));
    assert_eq!(bob_view.remote_stream.as_deref(), Some("remote-stream"));
    assert_eq!(bob_view.room_label, Some(format!("Room ID: {}", room_id)));

    assert_eq!(relay.traffic.count(MessageKind::Offer), 1);
    assert_eq!(relay.traffic.count(MessageKind::Answer), 1);
    assert!(relay.traffic.count(MessageKind::IceCandidate) >= 2);

    // Bob leaves: Alice keeps the room and loses the remote stream
    bob.handle.disconnect().await.unwrap();
    let deliveries = relay.hub.lock().disconnect(2);
    for delivery in deliveries {
        if let Some(handle) = relay.sessions.lock().get(&delivery.to) {
            handle.post(SessionEvent::Signal(delivery.message));
        }
    }
    let alice_view = wait_for(&mut alice.view, |v| v.remote_stream.is_none()).await;
    assert_eq!(alice_view.call, PeerState::Closed);
    assert_eq!(alice_view.room_label, Some(format!("Room ID: {}", room_id)));

    alice.handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn unknown_room_is_reported() {
    let relay = Arc::new(Relay {
        hub: Mutex::new(Hub::new(Detector::unloaded(Vec::new()))),
        sessions: Mutex::new(HashMap::new()),
        traffic: Traffic::default(),
    });
    let mut carol = spawn_participant(&relay, 7);

    carol.handle.join_room("deadbeef").await.unwrap();
    let view = wait_for(&mut carol.view, |v| v.alert.is_some()).await;
    assert_eq!(view.alert.as_deref(), Some("Room not found"));
    assert!(view.room_label.is_none());
}
