use anyhow::{Context, Result};
use std::time::Duration;

use crate::manager::ManagerOptions;
use crate::node::NodeOptions;
use crate::voice::GatewayPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Nodo Lavalink
    pub node_id: String,
    pub host: String,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub secure: bool,

    // Bot
    pub bot_user_id: String,
    pub shards: u32,

    // Reconexión
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,

    // Resume
    pub resume_key: Option<String>,
    pub resume_timeout: Option<u64>, // En segundos

    // Reproducción
    pub play_delay: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup. Unset or blank values
    /// fall back to [`Config::default`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            node_id: var("LAVALINK_NODE_ID").unwrap_or(defaults.node_id),
            host: var("LAVALINK_HOST").unwrap_or(defaults.host),
            port: match var("LAVALINK_PORT") {
                Some(port) => Some(port.parse().context("LAVALINK_PORT inválido")?),
                None => defaults.port,
            },
            password: var("LAVALINK_PASSWORD"),
            secure: match var("LAVALINK_SECURE") {
                Some(secure) => secure.parse().context("LAVALINK_SECURE debe ser true/false")?,
                None => defaults.secure,
            },

            bot_user_id: var("BOT_USER_ID").unwrap_or_default(),
            shards: match var("NUM_SHARDS") {
                Some(shards) => shards.parse().context("NUM_SHARDS inválido")?,
                None => defaults.shards,
            },

            reconnect_attempts: match var("RECONNECT_ATTEMPTS") {
                Some(amount) => amount.parse().context("RECONNECT_ATTEMPTS inválido")?,
                None => defaults.reconnect_attempts,
            },
            reconnect_delay: match var("RECONNECT_DELAY") {
                Some(delay) => humantime::parse_duration(&delay)
                    .context("RECONNECT_DELAY inválido (ej: 10s)")?,
                None => defaults.reconnect_delay,
            },

            resume_key: var("RESUME_KEY"),
            resume_timeout: var("RESUME_TIMEOUT")
                .map(|t| t.parse::<u64>().context("RESUME_TIMEOUT inválido"))
                .transpose()?,

            play_delay: match var("PLAY_DELAY") {
                Some(delay) => {
                    let delay =
                        humantime::parse_duration(&delay).context("PLAY_DELAY inválido (ej: 1s)")?;
                    // 0s lo desactiva
                    (!delay.is_zero()).then_some(delay)
                }
                None => defaults.play_delay,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// Same bounds the manager enforces, reported before anything is built.
    pub fn validate(&self) -> Result<()> {
        if self.bot_user_id.trim().is_empty() {
            anyhow::bail!("BOT_USER_ID es obligatorio");
        }

        if self.host.is_empty() {
            anyhow::bail!("LAVALINK_HOST must be a non-empty string");
        }

        if self.node_id.is_empty() {
            anyhow::bail!("LAVALINK_NODE_ID must be a non-empty string");
        }

        if self.shards < 1 {
            anyhow::bail!("NUM_SHARDS must be 1 or greater, got: {}", self.shards);
        }

        if self.reconnect_attempts < 1 {
            anyhow::bail!(
                "RECONNECT_ATTEMPTS must be 1 or greater, got: {}",
                self.reconnect_attempts
            );
        }

        if self.reconnect_delay < Duration::from_millis(1) {
            anyhow::bail!("RECONNECT_DELAY must be at least 1ms");
        }

        if self.resume_timeout == Some(0) {
            anyhow::bail!("RESUME_TIMEOUT must be 1 or greater");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The password is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Nodo: {} en {} (secure={}, password={})\n  \
            Bot: {} ({} shards)\n  \
            Reconexión: {} intentos cada {}\n  \
            Resume: {}\n  \
            Play delay: {}",
            self.node_id,
            self.node_options().ws_address(),
            self.secure,
            if self.password.is_some() { "custom" } else { "default" },
            self.bot_user_id,
            self.shards,
            self.reconnect_attempts,
            humantime::format_duration(self.reconnect_delay),
            match (&self.resume_key, self.resume_timeout) {
                (None, None) => "off".to_string(),
                (key, timeout) => format!(
                    "key={}, timeout={}s",
                    key.as_deref().unwrap_or("auto"),
                    timeout.unwrap_or(DEFAULT_RESUME_TIMEOUT)
                ),
            },
            self.play_delay
                .map_or("off".to_string(), |d| humantime::format_duration(d).to_string()),
        )
    }

    pub fn node_options(&self) -> NodeOptions {
        let mut node = NodeOptions::new(&self.node_id, &self.host).secure(self.secure);
        if let Some(port) = self.port {
            node = node.port(port);
        }
        if let Some(password) = &self.password {
            node = node.password(password);
        }
        node
    }

    pub fn manager_options(
        &self,
        send: impl Fn(&str, GatewayPayload) + Send + Sync + 'static,
    ) -> ManagerOptions {
        let mut options = ManagerOptions::new(send)
            .with_shards(self.shards)
            .with_reconnect(self.reconnect_attempts, self.reconnect_delay)
            .with_play_delay(self.play_delay);

        if self.resume_key.is_some() || self.resume_timeout.is_some() {
            options = options.with_resume(
                self.resume_key.clone(),
                self.resume_timeout.unwrap_or(DEFAULT_RESUME_TIMEOUT),
            );
        }
        options
    }
}

const DEFAULT_RESUME_TIMEOUT: u64 = 60;

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "main".to_string(),
            host: "localhost".to_string(),
            port: Some(2333),
            password: None,
            secure: false,

            // Bot (no default - must be provided)
            bot_user_id: String::new(),
            shards: 1,

            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(10),

            resume_key: None,
            resume_timeout: None,

            play_delay: Some(Duration::from_secs(1)),
        }
    }
}
