use std::fs;
use std::path::Path;

use framebus_core::{IsolationMode, TargetScope, DEFAULT_QUEUE_CAPACITY};

/// High-level configuration for the frame relay demo
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRelayConfig {
    pub host: WindowConfig,
    pub frame: WindowConfig,
    pub channel: ChannelConfig,
    /// Number of ping/pong round trips to run
    pub rounds: u32,
    /// Undelivered messages each window holds before dropping posts
    pub queue_capacity: usize,
}

/// One simulated execution context
#[derive(Clone, Debug, PartialEq)]
pub struct WindowConfig {
    pub label: String,
    pub origin: String,
}

/// Settings shared by both endpoints of the channel
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    pub connection_id: Option<String>,
    /// Scope the host uses when posting to the frame
    pub frame_scope: TargetScope,
    /// Scope the frame uses when posting to the host
    pub host_scope: TargetScope,
    pub isolation: Option<IsolationMode>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connection_id: std::env::var("FRAMEBUS_CONNECTION_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            frame_scope: env_parse("FRAMEBUS_FRAME_SCOPE").unwrap_or_default(),
            host_scope: env_parse("FRAMEBUS_HOST_SCOPE").unwrap_or_default(),
            isolation: env_parse("FRAMEBUS_ISOLATION"),
        }
    }
}

impl Default for FrameRelayConfig {
    fn default() -> Self {
        Self {
            host: WindowConfig {
                label: "host".into(),
                origin: std::env::var("FRAMEBUS_HOST_ORIGIN")
                    .unwrap_or_else(|_| "https://app.example".into()),
            },
            frame: WindowConfig {
                label: "frame".into(),
                origin: std::env::var("FRAMEBUS_FRAME_ORIGIN")
                    .unwrap_or_else(|_| "https://widget.example".into()),
            },
            channel: ChannelConfig::default(),
            rounds: env_parse("FRAMEBUS_ROUNDS").unwrap_or(3),
            queue_capacity: env_parse("FRAMEBUS_QUEUE_CAPACITY").unwrap_or(DEFAULT_QUEUE_CAPACITY),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl FrameRelayConfig {
    /// Load configuration from a TOML file (path via FRAMEBUS_CONFIG or ./frame_relay.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("FRAMEBUS_CONFIG").unwrap_or_else(|_| "frame_relay.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "frame_relay", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "frame_relay", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "frame_relay", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        let overlay = toml::from_str::<FrameRelayToml>(s)?;
        Ok(overlay.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FrameRelayToml {
    pub rounds: Option<u32>,
    pub queue_capacity: Option<usize>,
    pub host: Option<WindowToml>,
    pub frame: Option<WindowToml>,
    pub channel: Option<ChannelToml>,
}

impl FrameRelayToml {
    fn overlay(self, mut base: FrameRelayConfig) -> FrameRelayConfig {
        if let Some(r) = self.rounds {
            base.rounds = r;
        }
        if let Some(c) = self.queue_capacity {
            base.queue_capacity = c;
        }
        if let Some(h) = self.host {
            h.apply(&mut base.host);
        }
        if let Some(f) = self.frame {
            f.apply(&mut base.frame);
        }
        if let Some(c) = self.channel {
            c.apply(&mut base.channel);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct WindowToml {
    pub label: Option<String>,
    pub origin: Option<String>,
}
impl WindowToml {
    fn apply(self, w: &mut WindowConfig) {
        if let Some(x) = self.label {
            w.label = x;
        }
        if let Some(x) = self.origin {
            w.origin = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ChannelToml {
    pub connection_id: Option<String>,
    pub frame_scope: Option<TargetScope>,
    pub host_scope: Option<TargetScope>,
    pub isolation: Option<IsolationMode>,
}
impl ChannelToml {
    fn apply(self, c: &mut ChannelConfig) {
        if let Some(x) = self.connection_id {
            c.connection_id = Some(x).filter(|s| !s.is_empty());
        }
        if let Some(x) = self.frame_scope {
            c.frame_scope = x;
        }
        if let Some(x) = self.host_scope {
            c.host_scope = x;
        }
        if let Some(x) = self.isolation {
            c.isolation = Some(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FrameRelayConfig {
        FrameRelayConfig {
            host: WindowConfig {
                label: "host".into(),
                origin: "https://app.example".into(),
            },
            frame: WindowConfig {
                label: "frame".into(),
                origin: "https://widget.example".into(),
            },
            channel: ChannelConfig {
                connection_id: None,
                frame_scope: TargetScope::Any,
                host_scope: TargetScope::Any,
                isolation: None,
            },
            rounds: 3,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    #[test]
    fn overlay_replaces_only_present_keys() {
        let toml = r#"
            rounds = 5
            queue_capacity = 16

            [frame]
            origin = "https://embed.example"

            [channel]
            connection_id = "svc1"
            frame_scope = "https://embed.example"
            isolation = "strict"
        "#;
        let cfg = FrameRelayConfig::from_toml_str(toml, base()).unwrap();
        assert_eq!(cfg.rounds, 5);
        assert_eq!(cfg.queue_capacity, 16);
        assert_eq!(cfg.host, base().host);
        assert_eq!(cfg.frame.origin, "https://embed.example");
        assert_eq!(cfg.frame.label, "frame");
        assert_eq!(cfg.channel.connection_id.as_deref(), Some("svc1"));
        assert_eq!(cfg.channel.frame_scope, TargetScope::origin("https://embed.example"));
        assert_eq!(cfg.channel.host_scope, TargetScope::Any);
        assert_eq!(cfg.channel.isolation, Some(IsolationMode::Strict));
    }

    #[test]
    fn empty_connection_id_means_none() {
        let cfg = FrameRelayConfig::from_toml_str("[channel]\nconnection_id = \"\"", base()).unwrap();
        assert_eq!(cfg.channel.connection_id, None);
    }

    #[test]
    fn bad_scope_is_a_parse_error() {
        assert!(FrameRelayConfig::from_toml_str("[channel]\nframe_scope = \"\"", base()).is_err());
    }
}
