//! `webrtc` crate backend
//!
//! Builds one `RTCPeerConnection` per session with a send track per local
//! media track, and forwards ICE, track and state callbacks as
//! [`PeerEvent`]s.

use super::{ConnectionState, PeerConnector, PeerEvent, PeerEventSink, PeerLink, SdpKind, WebRTCError};
use crate::capture::{LocalMedia, TrackKind};
use crate::config::{IceServerConfig, WebRTCConfig};
use crate::signaling::IceCandidate;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use sha1::Sha1;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Lifetime of shared-secret TURN credentials
const TURN_CREDENTIAL_TTL_SECS: u64 = 24 * 60 * 60;

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Peer connector backed by the `webrtc` crate
pub struct RtcPeerConnector {
    config: WebRTCConfig,
}

impl RtcPeerConnector {
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRTCError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = build_ice_servers(&self.config)
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }

    async fn attach_tracks(peer_connection: &Arc<RTCPeerConnection>, media: &LocalMedia) -> Result<(), WebRTCError> {
        for track in media.tracks() {
            let mime_type = match track.kind {
                TrackKind::Video => MIME_TYPE_VP8,
                TrackKind::Audio => MIME_TYPE_OPUS,
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_string(),
                    ..Default::default()
                },
                track.id.clone(),
                media.stream_id().to_string(),
            ));

            peer_connection
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| WebRTCError::MediaError(format!("Failed to add {} track: {}", track.kind.as_str(), e)))?;
            debug!("Added local {} track {}", track.kind.as_str(), track.id);
        }
        Ok(())
    }

    fn install_callbacks(peer_connection: &Arc<RTCPeerConnection>, events: PeerEventSink) {
        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let events = state_events.clone();
            Box::pin(async move {
                info!("Peer connection state (epoch {}): {}", events.epoch(), state);
                events.emit(PeerEvent::StateChanged(state.into()));
            })
        }));

        let ice_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let events = ice_events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete (epoch {})", events.epoch());
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.emit(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                events.emit(PeerEvent::RemoteTrack {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind,
                });
            })
        }));
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(&self, media: &LocalMedia, events: PeerEventSink) -> Result<Box<dyn PeerLink>, WebRTCError> {
        let peer_connection = self.create_peer_connection().await?;
        Self::install_callbacks(&peer_connection, events);

        if let Err(e) = Self::attach_tracks(&peer_connection, media).await {
            let _ = peer_connection.close().await;
            return Err(e);
        }

        Ok(Box::new(RtcPeerLink { peer_connection }))
    }
}

/// A live `RTCPeerConnection`
pub struct RtcPeerLink {
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<String, WebRTCError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set local description: {}", e)))?;

        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String, WebRTCError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set local description: {}", e)))?;

        Ok(answer.sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), WebRTCError> {
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string())
                .map_err(|e| WebRTCError::SdpError(format!("Invalid SDP offer: {}", e)))?,
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string())
                .map_err(|e| WebRTCError::SdpError(format!("Invalid SDP answer: {}", e)))?,
        };

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), WebRTCError> {
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.peer_connection
            .add_ice_candidate(candidate_init)
            .await
            .map_err(|e| WebRTCError::IceError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

/// Effective ICE servers: STUN, then TURN, falling back to the explicit list
pub fn build_ice_servers(config: &WebRTCConfig) -> Vec<IceServerConfig> {
    let mut servers = Vec::new();

    if !config.stun_host.is_empty() && config.stun_port != 0 {
        servers.push(IceServerConfig {
            urls: vec![format!("stun:{}:{}", config.stun_host, config.stun_port)],
            username: None,
            credential: None,
        });
    }

    if !config.turn_host.is_empty() {
        let scheme = if config.turn_tls { "turns" } else { "turn" };
        let transport = if config.turn_protocol.is_empty() {
            "udp"
        } else {
            config.turn_protocol.as_str()
        };
        let url = format!("{}:{}:{}?transport={}", scheme, config.turn_host, config.turn_port, transport);

        let (username, credential) = if !config.turn_shared_secret.is_empty() {
            let (user, password) = turn_credentials(&config.turn_shared_secret, TURN_CREDENTIAL_TTL_SECS);
            (Some(user), Some(password))
        } else if !config.turn_username.is_empty() && !config.turn_password.is_empty() {
            (Some(config.turn_username.clone()), Some(config.turn_password.clone()))
        } else {
            (None, None)
        };

        servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
    }

    if servers.is_empty() {
        return config.ice_servers.clone();
    }

    servers
}

/// Time-limited TURN REST credentials (`<expiry>:signbridge`, HMAC-SHA1)
fn turn_credentials(secret: &str, ttl_secs: u64) -> (String, String) {
    let expiry = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() + ttl_secs)
        .unwrap_or(ttl_secs);
    let user = format!("{}:signbridge", expiry);
    let password = hmac_sha1_base64(secret, &user);
    (user, password)
}

fn hmac_sha1_base64(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length
    let mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map(|mut mac| {
        mac.update(message.as_bytes());
        mac.finalize().into_bytes()
    });
    match mac {
        Ok(digest) => base64::engine::general_purpose::STANDARD.encode(digest),
        Err(_) => String::new(),
    }
}
