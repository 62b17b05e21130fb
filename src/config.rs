use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for the connect phase of a request, 30s.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request deadline, 60s.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of redirects before a request is deemed as failed, 10.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default user agent, `egressor-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("egressor/", env!("CARGO_PKG_VERSION"));

/// Live configuration of an egress manager.
///
/// Mutated only field-by-field through [`ConfigUpdate`]; it is never replaced
/// wholesale, so settings applied earlier survive later partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Ordered pool of egress (source) addresses to rotate through.
    ///
    /// When empty, requests leave through the machine's default route and
    /// every dispatch to a host is subject to the host's minimum spacing.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Timeout for the connect phase of a request
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-request deadline
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Default `User-Agent` header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum spacing between dispatches to a host without an override
    #[serde(default, with = "humantime_serde")]
    pub default_delay: Duration,

    /// Maximum number of redirect hops per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Maximum idle connections kept per destination host, per egress
    /// address. Zero disables keep-alive entirely, which bounds the
    /// idle-connection count when many egress addresses are configured.
    #[serde(default)]
    pub max_idle_per_host: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            default_delay: Duration::ZERO,
            max_redirects: default_max_redirects(),
            max_idle_per_host: 0,
        }
    }
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

/// A partial configuration update.
///
/// Absent fields leave the prior value untouched. `addresses` are appended
/// to the pool, never removed; appending invalidates the egress resource
/// cache because the index-to-address mapping changed underneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    /// Egress addresses to append to the pool
    #[serde(default)]
    pub addresses: Vec<String>,

    /// New connect timeout
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    /// New per-request deadline
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// New default `User-Agent` header value
    #[serde(default)]
    pub user_agent: Option<String>,

    /// New baseline per-host spacing
    #[serde(default, with = "humantime_serde")]
    pub default_delay: Option<Duration>,

    /// New redirect cap
    #[serde(default)]
    pub max_redirects: Option<usize>,

    /// New idle-connection limit (zero disables keep-alive)
    #[serde(default)]
    pub max_idle_per_host: Option<usize>,
}

impl EgressConfig {
    /// Merge a partial update into the live configuration.
    ///
    /// Returns `true` when the address pool grew, which is the caller's cue
    /// to invalidate the egress resource cache.
    pub(crate) fn apply(&mut self, update: ConfigUpdate) -> bool {
        let ConfigUpdate {
            addresses,
            connect_timeout,
            request_timeout,
            user_agent,
            default_delay,
            max_redirects,
            max_idle_per_host,
        } = update;

        if let Some(timeout) = connect_timeout {
            self.connect_timeout = timeout;
        }
        if let Some(timeout) = request_timeout {
            self.request_timeout = timeout;
        }
        if let Some(agent) = user_agent {
            self.user_agent = agent;
        }
        if let Some(delay) = default_delay {
            self.default_delay = delay;
        }
        if let Some(max) = max_redirects {
            self.max_redirects = max;
        }
        if let Some(max) = max_idle_per_host {
            self.max_idle_per_host = max;
        }

        let pool_grew = !addresses.is_empty();
        self.addresses.extend(addresses);
        pool_grew
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EgressConfig::default();
        assert!(config.addresses.is_empty());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.default_delay, Duration::ZERO);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(config.max_idle_per_host, 0);
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut config = EgressConfig::default();
        let grew = config.apply(ConfigUpdate {
            default_delay: Some(Duration::from_secs(2)),
            ..ConfigUpdate::default()
        });

        assert!(!grew);
        assert_eq!(config.default_delay, Duration::from_secs(2));
        // Everything else keeps its prior value
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_apply_appends_addresses() {
        let mut config = EgressConfig::default();

        let grew = config.apply(ConfigUpdate {
            addresses: vec!["10.0.0.1".to_string()],
            ..ConfigUpdate::default()
        });
        assert!(grew);

        let grew = config.apply(ConfigUpdate {
            addresses: vec!["10.0.0.2".to_string()],
            ..ConfigUpdate::default()
        });
        assert!(grew);

        assert_eq!(config.addresses, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_apply_without_addresses_keeps_pool() {
        let mut config = EgressConfig {
            addresses: vec!["10.0.0.1".to_string()],
            ..EgressConfig::default()
        };

        let grew = config.apply(ConfigUpdate {
            user_agent: Some("custom/1.0".to_string()),
            ..ConfigUpdate::default()
        });

        assert!(!grew);
        assert_eq!(config.addresses, vec!["10.0.0.1"]);
        assert_eq!(config.user_agent, "custom/1.0");
    }
}
