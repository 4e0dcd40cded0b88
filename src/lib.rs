//! signbridge - video calls with live sign-language detection
//!
//! Client-side call session (signaling, rooms, WebRTC negotiation, capture,
//! periodic still-frame classification) and the rendezvous server it talks to.

pub mod capture;
pub mod config;
pub mod detection;
pub mod encode;
pub mod peer;
pub mod room;
pub mod server;
pub mod session;
pub mod signaling;
pub mod view;

// Re-exports
pub use config::{Config, WebRTCConfig};
pub use session::{CallError, CallHandle, CallSession, Command, SessionEvent};
pub use signaling::{SignalingClient, SignalingMessage};
