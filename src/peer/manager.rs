//! Peer session state machine
//!
//! Owns the single active peer session. Negotiation follows
//! `Idle -> Negotiating -> Connected -> Closed`; `Closed` behaves as `Idle`
//! for the next cycle. Remote candidates that arrive before the remote
//! description are queued and flushed in receipt order exactly once.

use super::{ConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerLink, SdpKind, WebRTCError};
use crate::capture::LocalMedia;
use crate::signaling::{IceCandidate, SignalingMessage};
use log::{debug, info, warn};
use std::sync::Arc;

/// Which side produced the offer of the current negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// We sent an offer and wait for the answer
    LocalOfferPending,
    /// We received an offer and answered it
    RemoteOfferPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating(Negotiation),
    Connected,
    Closed,
}

/// Outcome of a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Held until the remote description is set
    Queued,
    Applied,
}

/// Side effects the call session must carry out
#[derive(Debug, Clone, PartialEq)]
pub enum PeerUpdate {
    /// Message for the remote peer
    SendSignal(SignalingMessage),
    /// Remote stream to bind to the remote surface
    RemoteStreamBound(String),
    /// Transport state changed
    Connection(ConnectionState),
    /// Session torn down; `remote_cleared` is true when a remote stream was unbound
    Closed { remote_cleared: bool },
}

struct PeerSession {
    epoch: u64,
    room_id: String,
    link: Box<dyn PeerLink>,
    transport: ConnectionState,
    local_description: Option<String>,
    remote_description: Option<String>,
    applied_candidates: usize,
    remote_stream: Option<String>,
}

pub struct PeerConnectionManager {
    connector: Arc<dyn PeerConnector>,
    forward: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>,
    session: Option<PeerSession>,
    state: PeerState,
    pending: Vec<IceCandidate>,
    last_epoch: u64,
}

impl PeerConnectionManager {
    /// `forward` receives every backend event tagged with its session epoch
    pub fn new(connector: Arc<dyn PeerConnector>, forward: Arc<dyn Fn(u64, PeerEvent) + Send + Sync>) -> Self {
        Self {
            connector,
            forward,
            session: None,
            state: PeerState::Idle,
            pending: Vec::new(),
            last_epoch: 0,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Epoch of the live session
    pub fn epoch(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.epoch)
    }

    pub fn room_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.room_id.as_str())
    }

    pub fn remote_stream(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.remote_stream.as_deref())
    }

    pub fn transport_state(&self) -> Option<ConnectionState> {
        self.session.as_ref().map(|s| s.transport)
    }

    pub fn local_description(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.local_description.as_deref())
    }

    pub fn has_remote_description(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.remote_description.is_some())
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn applied_candidates(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.applied_candidates)
    }

    /// Replace any session with a new one that offers
    pub async fn start_offer(&mut self, room_id: &str, media: &LocalMedia) -> Result<SignalingMessage, WebRTCError> {
        self.replace_session(room_id, media, Negotiation::LocalOfferPending).await?;
        let Some(session) = self.session.as_mut() else {
            return Err(WebRTCError::NoSession);
        };

        let offer = session.link.create_offer().await;
        match offer {
            Ok(sdp) => {
                session.local_description = Some(sdp.clone());
                info!("Created offer for room {} (epoch {})", room_id, session.epoch);
                Ok(SignalingMessage::offer(sdp, room_id))
            }
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Replace any session with a new one answering `sdp`
    pub async fn handle_offer(
        &mut self,
        room_id: &str,
        media: &LocalMedia,
        sdp: &str,
    ) -> Result<SignalingMessage, WebRTCError> {
        self.replace_session(room_id, media, Negotiation::RemoteOfferPending).await?;
        let Some(session) = self.session.as_mut() else {
            return Err(WebRTCError::NoSession);
        };

        session.link.set_remote_description(SdpKind::Offer, sdp).await?;
        session.remote_description = Some(sdp.to_string());
        self.flush_candidates().await;

        let Some(session) = self.session.as_mut() else {
            return Err(WebRTCError::NoSession);
        };
        let answer = session.link.create_answer().await?;
        session.local_description = Some(answer.clone());
        info!("Created answer for room {} (epoch {})", room_id, session.epoch);
        Ok(SignalingMessage::answer(answer, room_id))
    }

    /// Apply the answer to our offer
    pub async fn handle_answer(&mut self, sdp: &str) -> Result<(), WebRTCError> {
        if self.state != PeerState::Negotiating(Negotiation::LocalOfferPending) {
            return Err(WebRTCError::InvalidState(format!("answer received in state {:?}", self.state)));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(WebRTCError::NoSession);
        };
        if session.remote_description.is_some() {
            return Err(WebRTCError::InvalidState("answer already applied".to_string()));
        }

        session.link.set_remote_description(SdpKind::Answer, sdp).await?;
        session.remote_description = Some(sdp.to_string());
        debug!("Applied answer (epoch {})", session.epoch);
        self.flush_candidates().await;
        Ok(())
    }

    /// Apply or queue a remote candidate
    pub async fn handle_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, WebRTCError> {
        match self.session.as_mut() {
            Some(session) if session.remote_description.is_some() => {
                session.link.add_ice_candidate(&candidate).await?;
                session.applied_candidates += 1;
                Ok(CandidateDisposition::Applied)
            }
            _ => {
                let (transport, kind) = candidate.transport_and_type();
                debug!(
                    "Queued remote candidate ({} {}), {} pending",
                    transport.as_deref().unwrap_or("?"),
                    kind.as_deref().unwrap_or("?"),
                    self.pending.len() + 1
                );
                self.pending.push(candidate);
                Ok(CandidateDisposition::Queued)
            }
        }
    }

    /// Process a backend event. Events from a replaced session yield nothing.
    pub async fn handle_event(&mut self, epoch: u64, event: PeerEvent) -> Vec<PeerUpdate> {
        let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) else {
            debug!("Ignoring event from stale peer session (epoch {}): {:?}", epoch, event);
            return Vec::new();
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                vec![PeerUpdate::SendSignal(SignalingMessage::ice_candidate(candidate, &session.room_id))]
            }
            PeerEvent::RemoteTrack { stream_id, track_id, kind } => {
                debug!("Remote {} track {} on stream {}", kind.as_str(), track_id, stream_id);
                if session.remote_stream.as_deref() == Some(stream_id.as_str()) {
                    return Vec::new();
                }
                session.remote_stream = Some(stream_id.clone());
                vec![PeerUpdate::RemoteStreamBound(stream_id)]
            }
            PeerEvent::StateChanged(state) => {
                session.transport = state;
                let mut updates = vec![PeerUpdate::Connection(state)];
                match state {
                    ConnectionState::Connected => {
                        info!("Peer connected (epoch {})", epoch);
                        self.state = PeerState::Connected;
                    }
                    ConnectionState::Failed | ConnectionState::Closed => {
                        warn!("Peer transport {:?}, tearing down (epoch {})", state, epoch);
                        let remote_cleared = self.teardown().await;
                        updates.push(PeerUpdate::Closed { remote_cleared });
                    }
                    ConnectionState::Disconnected => {
                        warn!("Peer transport disconnected (epoch {}), waiting for recovery", epoch);
                    }
                    ConnectionState::New | ConnectionState::Connecting => {}
                }
                updates
            }
        }
    }

    /// Tear down the session. Returns true when a remote stream was unbound.
    pub async fn close(&mut self, reason: &str) -> bool {
        if self.session.is_none() {
            self.pending.clear();
            return false;
        }
        info!("Closing peer session: {}", reason);
        self.teardown().await
    }

    /// Tear down the session of `epoch` if it is still negotiating.
    /// Returns `Some(remote_cleared)` when it was torn down.
    pub async fn expire(&mut self, epoch: u64) -> Option<bool> {
        if self.epoch() != Some(epoch) || !matches!(self.state, PeerState::Negotiating(_)) {
            return None;
        }
        warn!("Negotiation timed out (epoch {})", epoch);
        Some(self.teardown().await)
    }

    async fn replace_session(
        &mut self,
        room_id: &str,
        media: &LocalMedia,
        negotiation: Negotiation,
    ) -> Result<(), WebRTCError> {
        if self.session.is_some() {
            info!("Replacing existing peer session");
            self.teardown().await;
        }

        self.last_epoch += 1;
        let epoch = self.last_epoch;
        let sink = PeerEventSink::new(epoch, self.forward.clone());
        let link = self.connector.connect(media, sink).await?;

        self.session = Some(PeerSession {
            epoch,
            room_id: room_id.to_string(),
            link,
            transport: ConnectionState::New,
            local_description: None,
            remote_description: None,
            applied_candidates: 0,
            remote_stream: None,
        });
        self.state = PeerState::Negotiating(negotiation);
        Ok(())
    }

    async fn flush_candidates(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }

        let queued = std::mem::take(&mut self.pending);
        debug!("Flushing {} queued candidates (epoch {})", queued.len(), session.epoch);
        for candidate in queued {
            match session.link.add_ice_candidate(&candidate).await {
                Ok(()) => session.applied_candidates += 1,
                Err(e) => warn!("Queued candidate rejected: {}", e),
            }
        }
    }

    async fn teardown(&mut self) -> bool {
        self.pending.clear();
        let Some(session) = self.session.take() else {
            return false;
        };

        if let Err(e) = session.link.close().await {
            warn!("Error closing peer link (epoch {}): {}", session.epoch, e);
        }
        self.state = PeerState::Closed;
        session.remote_stream.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::{Frame, MediaSource, MediaTrack, TrackKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every link call as a string
    #[derive(Default)]
    pub struct MockConnector {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_remote: bool,
        pub connects: Mutex<u64>,
    }

    struct MockLink {
        epoch: u64,
        log: Arc<Mutex<Vec<String>>>,
        fail_remote: bool,
    }

    #[async_trait]
    impl PeerConnector for MockConnector {
        async fn connect(&self, _media: &LocalMedia, events: PeerEventSink) -> Result<Box<dyn PeerLink>, WebRTCError> {
            *self.connects.lock() += 1;
            self.log.lock().push(format!("connect:{}", events.epoch()));
            Ok(Box::new(MockLink {
                epoch: events.epoch(),
                log: self.log.clone(),
                fail_remote: self.fail_remote,
            }))
        }
    }

    #[async_trait]
    impl PeerLink for MockLink {
        async fn create_offer(&self) -> Result<String, WebRTCError> {
            self.log.lock().push(format!("offer:{}", self.epoch));
            Ok(format!("offer-sdp-{}", self.epoch))
        }

        async fn create_answer(&self) -> Result<String, WebRTCError> {
            self.log.lock().push(format!("answer:{}", self.epoch));
            Ok(format!("answer-sdp-{}", self.epoch))
        }

        async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), WebRTCError> {
            if self.fail_remote {
                return Err(WebRTCError::SdpError("malformed".to_string()));
            }
            self.log.lock().push(format!("remote:{:?}:{}", kind, sdp));
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError> {
            self.log.lock().push(format!("ice:{}", candidate.candidate));
            Ok(())
        }

        async fn close(&self) -> Result<(), WebRTCError> {
            self.log.lock().push(format!("close:{}", self.epoch));
            Ok(())
        }
    }

    pub struct StaticSource;

    impl MediaSource for StaticSource {
        fn stream_id(&self) -> &str {
            "local"
        }

        fn tracks(&self) -> Vec<MediaTrack> {
            vec![MediaTrack {
                id: "v0".to_string(),
                kind: TrackKind::Video,
            }]
        }

        fn snapshot(&self) -> Option<Frame> {
            None
        }

        fn stop(&self) {}
    }

    fn media() -> LocalMedia {
        LocalMedia::new(Arc::new(StaticSource))
    }

    fn manager(connector: Arc<MockConnector>) -> PeerConnectionManager {
        PeerConnectionManager::new(connector, Arc::new(|_, _| {}))
    }

    fn log_of(connector: &MockConnector) -> Vec<String> {
        connector.log.lock().clone()
    }

    #[tokio::test]
    async fn offer_then_answer() {
        let connector = Arc::new(MockConnector::default());
        let mut peers = manager(connector.clone());

        let offer = peers.start_offer("room1", &media()).await.unwrap();
        assert_eq!(offer, SignalingMessage::offer("offer-sdp-1".to_string(), "room1"));
        assert_eq!(peers.state(), PeerState::Negotiating(Negotiation::LocalOfferPending));

        peers.handle_answer("answer-sdp").await.unwrap();
        assert!(peers.has_remote_description());
        assert_eq!(
            log_of(&connector),
            vec!["connect:1", "offer:1", "remote:Answer:answer-sdp"]
        );

        let updates = peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Connected)).await;
        assert_eq!(updates, vec![PeerUpdate::Connection(ConnectionState::Connected)]);
        assert_eq!(peers.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn early_candidates_flush_in_order_once() {
        let connector = Arc::new(MockConnector::default());
        let mut peers = manager(connector.clone());

        // Candidates before any session exists
        for c in ["c1", "c2"] {
            let disposition = peers.handle_remote_candidate(IceCandidate::new(c)).await.unwrap();
            assert_eq!(disposition, CandidateDisposition::Queued);
        }
        assert_eq!(peers.pending_candidates(), 2);

        let answer = peers.handle_offer("room1", &media(), "remote-offer").await.unwrap();
        assert_eq!(answer, SignalingMessage::answer("answer-sdp-1".to_string(), "room1"));
        assert_eq!(peers.pending_candidates(), 0);

        let disposition = peers.handle_remote_candidate(IceCandidate::new("c3")).await.unwrap();
        assert_eq!(disposition, CandidateDisposition::Applied);

        assert_eq!(
            log_of(&connector),
            vec![
                "connect:1",
                "remote:Offer:remote-offer",
                "ice:c1",
                "ice:c2",
                "answer:1",
                "ice:c3",
            ]
        );
        assert_eq!(peers.applied_candidates(), 3);
    }

    #[tokio::test]
    async fn candidates_wait_for_answer() {
        let connector = Arc::new(MockConnector::default());
        let mut peers = manager(connector.clone());
        peers.start_offer("room1", &media()).await.unwrap();

        peers.handle_remote_candidate(IceCandidate::new("c1")).await.unwrap();
        assert_eq!(peers.pending_candidates(), 1);
        peers.handle_answer("sdp").await.unwrap();
        peers.handle_answer("sdp").await.unwrap_err();

        let ice: Vec<String> = log_of(&connector).into_iter().filter(|l| l.starts_with("ice:")).collect();
        assert_eq!(ice, vec!["ice:c1"]);
    }

    #[tokio::test]
    async fn answer_without_offer_is_rejected() {
        let mut peers = manager(Arc::new(MockConnector::default()));
        assert!(matches!(
            peers.handle_answer("sdp").await,
            Err(WebRTCError::InvalidState(_))
        ));

        peers.handle_offer("room1", &media(), "offer").await.unwrap();
        assert!(matches!(
            peers.handle_answer("sdp").await,
            Err(WebRTCError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn failed_remote_description_keeps_session() {
        let connector = Arc::new(MockConnector {
            fail_remote: true,
            ..Default::default()
        });
        let mut peers = manager(connector);
        peers.handle_remote_candidate(IceCandidate::new("c1")).await.unwrap();

        let err = peers.handle_offer("room1", &media(), "bad").await.unwrap_err();
        assert!(matches!(err, WebRTCError::SdpError(_)));
        assert_eq!(peers.state(), PeerState::Negotiating(Negotiation::RemoteOfferPending));
        assert_eq!(peers.epoch(), Some(1));
        assert_eq!(peers.pending_candidates(), 1);
    }

    #[tokio::test]
    async fn new_offer_replaces_session() {
        let connector = Arc::new(MockConnector::default());
        let mut peers = manager(connector.clone());
        peers.start_offer("room1", &media()).await.unwrap();
        peers.handle_remote_candidate(IceCandidate::new("stale")).await.unwrap();

        peers.handle_offer("room1", &media(), "offer2").await.unwrap();
        assert_eq!(peers.epoch(), Some(2));
        assert!(log_of(&connector).contains(&"close:1".to_string()));
        assert!(!log_of(&connector).contains(&"ice:stale".to_string()));

        // Events from the replaced session are ignored
        let updates = peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Failed)).await;
        assert!(updates.is_empty());
        assert_eq!(peers.epoch(), Some(2));
    }

    #[tokio::test]
    async fn remote_stream_bound_once_per_stream() {
        let mut peers = manager(Arc::new(MockConnector::default()));
        peers.start_offer("room1", &media()).await.unwrap();

        let track = |id: &str| PeerEvent::RemoteTrack {
            stream_id: "remote".to_string(),
            track_id: id.to_string(),
            kind: TrackKind::Video,
        };
        assert_eq!(
            peers.handle_event(1, track("v")).await,
            vec![PeerUpdate::RemoteStreamBound("remote".to_string())]
        );
        assert!(peers.handle_event(1, track("a")).await.is_empty());
        assert_eq!(peers.remote_stream(), Some("remote"));
    }

    #[tokio::test]
    async fn local_candidates_are_tagged_with_room() {
        let mut peers = manager(Arc::new(MockConnector::default()));
        peers.start_offer("room1", &media()).await.unwrap();

        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        let updates = peers.handle_event(1, PeerEvent::LocalCandidate(candidate.clone())).await;
        assert_eq!(
            updates,
            vec![PeerUpdate::SendSignal(SignalingMessage::ice_candidate(candidate, "room1"))]
        );
    }

    #[tokio::test]
    async fn close_clears_remote_binding_once() {
        let connector = Arc::new(MockConnector::default());
        let mut peers = manager(connector.clone());
        peers.start_offer("room1", &media()).await.unwrap();
        peers.handle_answer("sdp").await.unwrap();
        peers
            .handle_event(
                1,
                PeerEvent::RemoteTrack {
                    stream_id: "remote".to_string(),
                    track_id: "v".to_string(),
                    kind: TrackKind::Video,
                },
            )
            .await;
        peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Connected)).await;

        assert!(peers.close("signaling lost").await);
        assert!(!peers.close("signaling lost").await);
        assert_eq!(peers.state(), PeerState::Closed);
        assert_eq!(peers.remote_stream(), None);
        let closes = log_of(&connector).iter().filter(|l| l.starts_with("close:")).count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn failed_transport_tears_down() {
        let mut peers = manager(Arc::new(MockConnector::default()));
        peers.start_offer("room1", &media()).await.unwrap();

        let updates = peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Disconnected)).await;
        assert_eq!(updates, vec![PeerUpdate::Connection(ConnectionState::Disconnected)]);
        assert_eq!(peers.epoch(), Some(1));

        let updates = peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Failed)).await;
        assert_eq!(
            updates,
            vec![
                PeerUpdate::Connection(ConnectionState::Failed),
                PeerUpdate::Closed { remote_cleared: false },
            ]
        );
        assert_eq!(peers.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn expire_only_while_negotiating() {
        let mut peers = manager(Arc::new(MockConnector::default()));
        peers.start_offer("room1", &media()).await.unwrap();
        assert_eq!(peers.expire(7).await, None);

        peers.handle_answer("sdp").await.unwrap();
        peers.handle_event(1, PeerEvent::StateChanged(ConnectionState::Connected)).await;
        assert_eq!(peers.expire(1).await, None);

        peers.start_offer("room1", &media()).await.unwrap();
        assert_eq!(peers.expire(2).await, Some(false));
        assert_eq!(peers.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn events_are_forwarded_with_epoch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = PeerEventSink::new(4, Arc::new(move |epoch, event| sink_seen.lock().push((epoch, event))));
        sink.emit(PeerEvent::StateChanged(ConnectionState::Connecting));
        assert_eq!(seen.lock()[0], (4, PeerEvent::StateChanged(ConnectionState::Connecting)));
    }
}
