use std::time::Duration;

use msgprims_frame::{FrameConfig, Terminators};
use serde::{Deserialize, Deserializer};

/// Default lifetime of a response stream that never ends.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an open response stream may wait for its terminal packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTimeout {
    /// End the stream with [`crate::StreamError::TimedOut`] after this long.
    After(Duration),
    /// Never time out. The stream leaks if the peer disappears without
    /// ending it and the connection stays up.
    Never,
}

impl ResponseTimeout {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            ResponseTimeout::After(d) => Some(d),
            ResponseTimeout::Never => None,
        }
    }
}

impl Default for ResponseTimeout {
    fn default() -> Self {
        ResponseTimeout::After(DEFAULT_RESPONSE_TIMEOUT)
    }
}

impl From<Duration> for ResponseTimeout {
    fn from(d: Duration) -> Self {
        ResponseTimeout::After(d)
    }
}

impl<'de> Deserialize<'de> for ResponseTimeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<u64>::deserialize(deserializer)? {
            Some(ms) => ResponseTimeout::After(Duration::from_millis(ms)),
            None => ResponseTimeout::Never,
        })
    }
}

/// Per-connection protocol configuration.
///
/// Loadable from JSON; durations are given in milliseconds and unknown keys
/// are rejected:
///
/// ```json
/// { "terminator": ["\r\n", "\n"], "response_timeout": 5000, "ping_interval": 1000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerConfig {
    /// Frame terminators, a string or an `[rx, tx]` pair. Default: `"\n"`.
    pub terminator: Terminators,
    /// Accept and send non-JSON text frames. Default: false.
    pub allow_non_json: bool,
    /// Default timeout for [`crate::PeerHandle::request`]; `null` disables it.
    pub response_timeout: ResponseTimeout,
    /// Ping interval; 0 disables liveness checks. Default: 0.
    #[serde(deserialize_with = "millis")]
    pub ping_interval: Duration,
    /// The remote end predates streaming requests and ping/pong. Requests
    /// fail fast and liveness checks stay off.
    pub legacy_peer: bool,
}

impl PeerConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            terminators: self.terminator.clone(),
            allow_non_json: self.allow_non_json,
        }
    }

    /// Ping interval actually in force; legacy peers never get pinged.
    pub fn effective_ping_interval(&self) -> Duration {
        if self.legacy_peer {
            Duration::ZERO
        } else {
            self.ping_interval
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            terminator: Terminators::default(),
            allow_non_json: false,
            response_timeout: ResponseTimeout::default(),
            ping_interval: Duration::ZERO,
            legacy_peer: false,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.terminator.rx(), b"\n");
        assert_eq!(
            config.response_timeout,
            ResponseTimeout::After(DEFAULT_RESPONSE_TIMEOUT)
        );
        assert_eq!(config.ping_interval, Duration::ZERO);
        assert!(!config.allow_non_json);
    }

    #[test]
    fn empty_json_is_default() {
        let config: PeerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PeerConfig::default());
    }

    #[test]
    fn full_json_config() {
        let config: PeerConfig = serde_json::from_str(
            r#"{
                "terminator": ["\r\n", "\n"],
                "allow_non_json": true,
                "response_timeout": null,
                "ping_interval": 250,
                "legacy_peer": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.terminator.rx(), b"\r\n");
        assert_eq!(config.terminator.tx(), b"\n");
        assert!(config.allow_non_json);
        assert_eq!(config.response_timeout, ResponseTimeout::Never);
        assert_eq!(config.ping_interval, Duration::from_millis(250));

        let frame = config.frame_config();
        assert_eq!(frame.terminators, config.terminator);
        assert!(frame.allow_non_json);
    }

    #[test]
    fn response_timeout_in_millis() {
        let config: PeerConfig = serde_json::from_str(r#"{"response_timeout": 50}"#).unwrap();
        assert_eq!(
            config.response_timeout.as_duration(),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(serde_json::from_str::<PeerConfig>(r#"{"terminater": "\n"}"#).is_err());
    }

    #[test]
    fn legacy_peer_disables_pings() {
        let config = PeerConfig {
            ping_interval: Duration::from_secs(1),
            legacy_peer: true,
            ..PeerConfig::default()
        };
        assert_eq!(config.effective_ping_interval(), Duration::ZERO);
    }
}
