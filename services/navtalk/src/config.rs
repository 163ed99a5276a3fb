use clap::Parser;
use navtalk_realtime::SessionConfig;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::Level;

pub const DEFAULT_CHARACTER_NAME: &str = "navtalk.Lauren";
pub const DEFAULT_VOICE: &str = "sage";
pub const DEFAULT_HOST: &str = "transfer.navtalk.ai";
pub const DEFAULT_PROMPT: &str = "You are a friendly technical interviewer. Begin with a concise \
greeting and immediately ask the first interview question without waiting for the candidate to \
start speaking. Ask one question at a time and keep each turn short.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Command-line overrides. Every flag takes precedence over its environment
/// variable.
#[derive(Parser, Debug, Default, Clone)]
#[command(version, about = "Talk to a realtime avatar from the terminal")]
pub struct Args {
    /// Avatar character to load.
    #[arg(long)]
    pub character: Option<String>,
    /// Voice identity for the assistant.
    #[arg(long)]
    pub voice: Option<String>,
    /// Relay host, optionally with a port.
    #[arg(long)]
    pub host: Option<String>,
    /// File whose contents become the assistant's instructions.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
    /// Print the assistant's transcript while it is still streaming.
    #[arg(long)]
    pub partials: bool,
    /// Use ws:// and http:// instead of their TLS counterparts.
    #[arg(long)]
    pub insecure: bool,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub license: SecretString,
    pub character_name: String,
    pub voice: String,
    pub host: String,
    pub prompt: String,
    pub tls: bool,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .map(|value| value.trim().to_string())
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_prompt(var: &str, path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|prompt| prompt.trim().to_string())
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), format!("{}: {e}", path.display())))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let license = std::env::var("NAVTALK_LICENSE")
            .map(|value| value.trim().to_string())
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("NAVTALK_LICENSE".to_string()))?;

        let character_name = var_or("NAVTALK_CHARACTER_NAME", DEFAULT_CHARACTER_NAME);
        let voice = var_or("NAVTALK_VOICE", DEFAULT_VOICE);
        let host = var_or("NAVTALK_BASE_URL", DEFAULT_HOST);

        let prompt = match std::env::var("NAVTALK_PROMPT_PATH") {
            Ok(path) if !path.trim().is_empty() => {
                read_prompt("NAVTALK_PROMPT_PATH", Path::new(path.trim()))?
            }
            _ => var_or("NAVTALK_PROMPT", DEFAULT_PROMPT),
        };

        let tls_str = var_or("NAVTALK_TLS", "true");
        let tls = tls_str.parse::<bool>().map_err(|_| {
            ConfigError::InvalidValue(
                "NAVTALK_TLS".to_string(),
                format!("'{}' is not true or false", tls_str),
            )
        })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            license: SecretString::from(license),
            character_name,
            voice,
            host,
            prompt,
            tls,
            log_level,
        })
    }

    /// Applies command-line overrides on top of the environment.
    pub fn with_args(mut self, args: &Args) -> Result<Self, ConfigError> {
        let trimmed = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        if let Some(path) = &args.prompt_file {
            self.prompt = read_prompt("--prompt-file", path)?;
        }
        if let Some(character) = trimmed(args.character.as_deref()) {
            self.character_name = character;
        }
        if let Some(voice) = trimmed(args.voice.as_deref()) {
            self.voice = voice;
        }
        if let Some(host) = trimmed(args.host.as_deref()) {
            self.host = host;
        }
        if args.insecure {
            self.tls = false;
        }
        Ok(self)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            self.license.expose_secret(),
            self.character_name.clone(),
            self.voice.clone(),
            self.host.clone(),
            self.prompt.clone(),
        )
        .with_tls(self.tls)
    }
}
