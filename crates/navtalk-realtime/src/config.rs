//! Construction-time configuration for a realtime session.

use crate::peer::MediaSink;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};

/// Immutable inputs supplied by the embedding application.
///
/// None of the strings are validated here; a bad license or an unknown
/// character name surfaces later as a protocol error from the relay.
#[derive(Clone)]
pub struct SessionConfig {
    pub license: SecretString,
    pub character_name: String,
    pub voice: String,
    /// Relay host, e.g. `transfer.navtalk.ai` or `127.0.0.1:8080`.
    pub host: String,
    pub instructions: String,
    /// `false` selects `ws://` and `http://` instead of `wss://` and `https://`.
    pub tls: bool,
    pub media_sink: Option<Arc<dyn MediaSink>>,
}

impl SessionConfig {
    pub fn new(
        license: impl Into<String>,
        character_name: impl Into<String>,
        voice: impl Into<String>,
        host: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            license: SecretString::from(license.into()),
            character_name: character_name.into(),
            voice: voice.into(),
            host: host.into(),
            instructions: instructions.into(),
            tls: true,
            media_sink: None,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_media_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.media_sink = Some(sink);
        self
    }

    /// The id the signaling relay knows this client by.
    pub(crate) fn target_session_id(&self) -> &str {
        self.license.expose_secret()
    }

    fn ws_scheme(&self) -> &'static str {
        if self.tls { "wss" } else { "ws" }
    }

    fn http_scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    pub fn control_url(&self) -> String {
        format!(
            "{}://{}/api/realtime-api?license={}&characterName={}",
            self.ws_scheme(),
            self.host,
            urlencoding::encode(self.license.expose_secret()),
            urlencoding::encode(&self.character_name),
        )
    }

    pub fn signaling_url(&self) -> String {
        format!(
            "{}://{}/api/webrtc?userId={}",
            self.ws_scheme(),
            self.host,
            urlencoding::encode(self.target_session_id()),
        )
    }

    pub fn ice_servers_url(&self) -> String {
        format!(
            "{}://{}/api/webrtc/generate-ice-servers",
            self.http_scheme(),
            self.host
        )
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("license", &"[REDACTED]")
            .field("character_name", &self.character_name)
            .field("voice", &self.voice)
            .field("host", &self.host)
            .field("instructions_len", &self.instructions.len())
            .field("tls", &self.tls)
            .field("media_sink", &self.media_sink.is_some())
            .finish()
    }
}
