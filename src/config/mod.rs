//! Configuration management for signbridge

use crate::capture::MediaConstraints;
use crate::signaling::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signaling channel configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Local capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Detection loop configuration
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Rendezvous server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Rendezvous server endpoint (ws:// or wss://)
    #[serde(default = "default_signaling_url")]
    pub url: String,

    /// Reconnection attempts after the channel is lost
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts in ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl SignalingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// ICE server entry passed through to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// WebRTC peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// Explicit ICE servers, used when no STUN/TURN host is configured
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,

    /// STUN host (empty disables STUN)
    #[serde(default = "default_stun_host")]
    pub stun_host: String,

    #[serde(default = "default_stun_port")]
    pub stun_port: u16,

    /// TURN host (empty disables TURN)
    #[serde(default)]
    pub turn_host: String,

    #[serde(default = "default_turn_port")]
    pub turn_port: u16,

    /// TURN transport ("udp" or "tcp")
    #[serde(default = "default_turn_protocol")]
    pub turn_protocol: String,

    /// Use turns: instead of turn:
    #[serde(default)]
    pub turn_tls: bool,

    #[serde(default)]
    pub turn_username: String,

    #[serde(default)]
    pub turn_password: String,

    /// Shared secret for time-limited TURN credentials
    #[serde(default)]
    pub turn_shared_secret: String,

    /// Seconds a session may spend negotiating before it is torn down
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,
}

impl WebRTCConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            stun_host: default_stun_host(),
            stun_port: default_stun_port(),
            turn_host: String::new(),
            turn_port: default_turn_port(),
            turn_protocol: default_turn_protocol(),
            turn_tls: false,
            turn_username: String::new(),
            turn_password: String::new(),
            turn_shared_secret: String::new(),
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Ideal capture width in pixels
    pub width: u32,

    /// Ideal capture height in pixels
    pub height: u32,

    /// Capture microphone audio
    pub audio: bool,

    /// Camera facing mode
    pub facing_mode: String,
}

impl CaptureConfig {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            width: self.width,
            height: self.height,
            audio: self.audio,
            facing_mode: self.facing_mode.clone(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            audio: true,
            facing_mode: "user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Frames per second sent for classification
    pub fps: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Number of results kept in the history list
    pub history_limit: usize,
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fps: 2,
            jpeg_quality: 80,
            history_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Directory whose sorted sub-directory names are the class labels
    pub classes_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            classes_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            webrtc: WebRTCConfig::default(),
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = self.signaling.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err("Signaling url must start with ws:// or wss://".into());
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err("Capture dimensions must be non-zero".into());
        }

        if self.detection.fps == 0 || self.detection.fps > 30 {
            return Err("Detection fps must be between 1 and 30".into());
        }

        if self.detection.jpeg_quality == 0 || self.detection.jpeg_quality > 100 {
            return Err("Detection jpeg_quality must be between 1 and 100".into());
        }

        if self.detection.history_limit == 0 {
            return Err("Detection history_limit must be non-zero".into());
        }

        if self.webrtc.negotiation_timeout_secs == 0 {
            return Err("WebRTC negotiation timeout must be non-zero".into());
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown logging level \"{}\"", self.logging.level).into());
        }

        if !self.webrtc.turn_host.is_empty() {
            let proto = self.webrtc.turn_protocol.to_ascii_lowercase();
            if proto != "udp" && proto != "tcp" {
                return Err("WebRTC turn_protocol must be \"udp\" or \"tcp\"".into());
            }
        } else if !self.webrtc.turn_shared_secret.is_empty() {
            return Err("WebRTC turn_shared_secret requires turn_host".into());
        }

        Ok(())
    }
}


fn default_signaling_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}

fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay_ms() -> u64 { 1000 }

fn default_stun_host() -> String {
    "stun.l.google.com".to_string()
}

fn default_stun_port() -> u16 { 19302 }
fn default_turn_port() -> u16 { 3478 }

fn default_turn_protocol() -> String {
    "udp".to_string()
}

fn default_negotiation_timeout_secs() -> u64 { 30 }
