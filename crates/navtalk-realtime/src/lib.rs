//! Client for a realtime talking-avatar session.
//!
//! A session holds two WebSockets to the relay: a control socket carrying the
//! conversation (session configuration, voice activity, transcripts) and a
//! signaling socket used to negotiate a WebRTC connection that delivers the
//! avatar's audio and video. Microphone audio is streamed to the control socket
//! as base64 PCM16 chunks.
//!
//! ```no_run
//! use navtalk_realtime::{Backends, RealtimeSession, SessionConfig, SessionEvent};
//!
//! # async fn demo() -> navtalk_realtime::Result<()> {
//! let config = SessionConfig::new("license", "navtalk.Lauren", "sage", "transfer.navtalk.ai", "Be brief.");
//! let (session, mut events) = RealtimeSession::spawn(config, Backends::system()?);
//! session.start().await?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::AssistantComplete { text, .. } = event {
//!         println!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod ice;
pub mod pcm;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod socket;
pub mod status;
pub mod teardown;
pub mod transcript;

pub use capture::{ActiveCapture, CpalMicrophone, Microphone};
pub use config::SessionConfig;
pub use error::{AudioError, RealtimeError, Result};
pub use event::SessionEvent;
pub use ice::{IceConfiguration, IceServer};
pub use peer::{MediaSink, PeerEvent, PeerEventSink, PeerFactory, PeerLink, PeerState, RtpDrainSink, WebRtcPeerFactory};
pub use session::{Backends, RealtimeSession, SessionSnapshot};
pub use status::SessionStatus;
