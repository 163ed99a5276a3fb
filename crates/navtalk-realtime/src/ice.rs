//! ICE server configuration and discovery from the relay.

use crate::{
    error::{RealtimeError, Result},
    protocol::IceServersResponse,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One STUN/TURN server entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    #[serde(deserialize_with = "string_or_list")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}

/// The ordered server list handed to each new peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfiguration {
    servers: Vec<IceServer>,
}

impl Default for IceConfiguration {
    fn default() -> Self {
        Self {
            servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
        }
    }
}

impl IceConfiguration {
    pub fn servers(&self) -> &[IceServer] {
        &self.servers
    }

    /// Applies a discovery outcome. A non-empty list replaces the current one
    /// wholesale; any failure keeps what was there. Returns whether the
    /// configuration changed.
    pub fn apply_discovery(&mut self, outcome: Result<Vec<IceServer>>) -> bool {
        match outcome {
            Ok(servers) if !servers.is_empty() => {
                info!(count = servers.len(), "Using relay-provided ICE servers");
                self.servers = servers;
                true
            }
            Ok(_) => {
                debug!("ICE discovery returned an empty list; keeping current servers");
                false
            }
            Err(e) => {
                debug!(error = %e, "ICE discovery failed; keeping current servers");
                false
            }
        }
    }
}

/// Asks the relay for TURN/STUN servers. Any non-success status, malformed
/// body, or empty list is reported as an error.
pub async fn discover_ice_servers(client: &reqwest::Client, url: &str) -> Result<Vec<IceServer>> {
    let response = client.post(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RealtimeError::DiscoveryStatus(status.as_u16()));
    }
    let body: IceServersResponse = response.json().await?;
    let servers = body.into_servers();
    if servers.is_empty() {
        return Err(RealtimeError::NoIceServers);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_public_stun() {
        let config = IceConfiguration::default();
        assert_eq!(config.servers(), &[IceServer::stun(DEFAULT_STUN_URL)]);
    }

    #[test]
    fn test_discovery_replaces_wholesale() {
        let mut config = IceConfiguration::default();
        let relay = vec![
            IceServer {
                urls: vec!["turn:relay:3478".into()],
                username: Some("u".into()),
                credential: Some("p".into()),
            },
            IceServer::stun("stun:relay:3478"),
        ];
        assert!(config.apply_discovery(Ok(relay.clone())));
        assert_eq!(config.servers(), relay.as_slice());
    }

    #[test]
    fn test_failed_or_empty_discovery_retains_previous() {
        let mut config = IceConfiguration::default();
        assert!(!config.apply_discovery(Err(RealtimeError::DiscoveryStatus(500))));
        assert!(!config.apply_discovery(Ok(vec![])));
        assert_eq!(config, IceConfiguration::default());

        config.apply_discovery(Ok(vec![IceServer::stun("stun:relay")]));
        assert!(!config.apply_discovery(Err(RealtimeError::NoIceServers)));
        assert_eq!(config.servers(), &[IceServer::stun("stun:relay")]);
    }

    #[test]
    fn test_urls_accept_string_or_list() {
        let one: IceServer = serde_json::from_str(r#"{"urls":"stun:a"}"#).unwrap();
        assert_eq!(one.urls, vec!["stun:a".to_string()]);
        let many: IceServer = serde_json::from_str(r#"{"urls":["turn:a","turn:b"]}"#).unwrap();
        assert_eq!(many.urls.len(), 2);
        assert!(serde_json::from_str::<IceServer>(r#"{"urls":5}"#).is_err());
    }
}
