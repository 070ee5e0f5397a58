//! Session configuration
//!
//! A TOML description of one session: what to open and how to size its
//! queue. Every field has a default, so an empty file is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::{
    Layer, OpenFlags, Param, BATCH_MAX, MTU_MAX, PRIORITY_DEFAULT, PRIORITY_HIGHEST,
    PRIORITY_LOWEST, QUEUE_LENGTH_DEFAULT, QUEUE_SIZE_DEFAULT, QUEUE_TIME_DEFAULT,
};
use crate::error::{Error, Result};

/// Settings for opening a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Filter expression handed to the engine
    pub filter: String,
    /// Layer to open against
    pub layer: Layer,
    /// Session priority
    pub priority: i16,
    /// Open flag names, e.g. `["sniff", "recv-only"]`
    pub flags: Vec<String>,
    /// Descriptors per batched receive
    pub batch_size: usize,
    /// Packet buffer size in bytes for batched receive
    pub packet_buffer: usize,
    /// Queue tuning applied right after open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: "true".to_string(),
            layer: Layer::Network,
            priority: PRIORITY_DEFAULT,
            flags: Vec::new(),
            batch_size: 16,
            packet_buffer: MTU_MAX,
            queue: None,
        }
    }
}

/// Engine queue parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued packets
    pub length: u64,
    /// Maximum time a packet may wait in the queue (ms)
    pub time_ms: u64,
    /// Maximum queued bytes
    pub size: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            length: QUEUE_LENGTH_DEFAULT,
            time_ms: QUEUE_TIME_DEFAULT,
            size: QUEUE_SIZE_DEFAULT,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.filter.trim().is_empty() {
            return Err(Error::Config("filter must not be empty".into()));
        }
        if !(PRIORITY_LOWEST..=PRIORITY_HIGHEST).contains(&self.priority) {
            return Err(Error::InvalidPriority {
                priority: self.priority,
                min: PRIORITY_LOWEST,
                max: PRIORITY_HIGHEST,
            });
        }
        if self.batch_size == 0 || self.batch_size > BATCH_MAX {
            return Err(Error::Config(format!(
                "batch_size must be between 1 and {BATCH_MAX}"
            )));
        }
        if self.packet_buffer == 0 {
            return Err(Error::Config("packet_buffer must be non-zero".into()));
        }
        self.open_flags()?;

        if let Some(ref queue) = self.queue {
            Param::QueueLength.validate(queue.length)?;
            Param::QueueTime.validate(queue.time_ms)?;
            Param::QueueSize.validate(queue.size)?;
        }

        Ok(())
    }

    /// Combined open flags
    pub fn open_flags(&self) -> Result<OpenFlags> {
        self.flags.iter().try_fold(OpenFlags::empty(), |acc, name| {
            OpenFlags::parse_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| Error::Config(format!("unknown open flag: {name}")))
        })
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = SessionConfig::from_toml("").unwrap();
        assert_eq!(config.filter, "true");
        assert_eq!(config.layer, Layer::Network);
        assert_eq!(config.batch_size, 16);
        assert!(config.queue.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = SessionConfig::from_toml(
            r#"
            filter = "outbound and tcp.DstPort == 443"
            layer = "network-forward"
            priority = -100
            flags = ["sniff", "recv_only"]
            batch_size = 64

            [queue]
            length = 8192
            time_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.layer, Layer::NetworkForward);
        assert_eq!(config.priority, -100);
        assert_eq!(
            config.open_flags().unwrap(),
            OpenFlags::SNIFF | OpenFlags::RECV_ONLY
        );
        let queue = config.queue.unwrap();
        assert_eq!(queue.length, 8192);
        assert_eq!(queue.size, QUEUE_SIZE_DEFAULT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SessionConfig {
            priority: 4000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidPriority { .. })));

        config.priority = 0;
        config.flags = vec!["promiscuous".into()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.flags.clear();
        config.queue = Some(QueueConfig {
            length: 1,
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(Error::ParamOutOfRange {
                param: Param::QueueLength,
                ..
            })
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SessionConfig {
            queue: Some(QueueConfig::default()),
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let parsed = SessionConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.queue, config.queue);
        assert_eq!(parsed.filter, config.filter);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/divert.toml"),
            Err(Error::ConfigNotFound { .. })
        ));
    }
}
