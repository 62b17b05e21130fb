use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use reqwest_cookie_store::CookieStoreMutex;
use url::Url;

use crate::config::EgressConfig;
use crate::cookies;
use crate::{ErrorKind, Result};

/// A cached transport/cookie-jar pair for one egress address.
///
/// `reqwest::Client` plays the transport role here: it is internally
/// reference-counted, so clones of a cached client share the same connection
/// pool, and the jar handle is shared the same way.
#[derive(Debug, Clone)]
pub(crate) struct EgressResource {
    pub(crate) client: reqwest::Client,
    pub(crate) jar: Arc<CookieStoreMutex>,
    /// Local address the client is bound to; `None` for the default route
    pub(crate) local_addr: Option<IpAddr>,
}

/// Lazily-populated cache of per-egress-address resources.
///
/// Entries are created on first use and live until the address pool is
/// replaced, at which point the whole per-address map is dropped and rebuilt
/// on demand. The default (unbound) resource survives invalidation, as does
/// the shared default jar.
#[derive(Debug)]
pub(crate) struct ResourceCache {
    /// Jar shared by the default resource and proxied clients
    default_jar: Arc<CookieStoreMutex>,
    /// Resource used when no egress pool is configured
    default_entry: Mutex<Option<EgressResource>>,
    /// One resource per configured egress address
    entries: Mutex<HashMap<String, EgressResource>>,
}

impl ResourceCache {
    pub(crate) fn new() -> Self {
        Self {
            default_jar: cookies::new_jar(),
            default_entry: Mutex::new(None),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide default cookie jar.
    pub(crate) fn default_jar(&self) -> &Arc<CookieStoreMutex> {
        &self.default_jar
    }

    /// Fetch or lazily build the resource for one egress address.
    ///
    /// # Errors
    ///
    /// Fails when the address does not resolve to a local IP or when the
    /// client cannot be built.
    pub(crate) fn get_or_create(
        &self,
        address: &str,
        config: &EgressConfig,
    ) -> Result<EgressResource> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(resource) = entries.get(address) {
            return Ok(resource.clone());
        }

        let local_addr = resolve_local_addr(address)?;
        let jar = cookies::new_jar();
        let client = build_client(Some(local_addr), config, Arc::clone(&jar))?;
        debug!("created egress resource for address {address} ({local_addr})");

        let resource = EgressResource {
            client,
            jar,
            local_addr: Some(local_addr),
        };
        entries.insert(address.to_string(), resource.clone());
        Ok(resource)
    }

    /// Fetch or lazily build the resource for the machine's default route.
    pub(crate) fn default_resource(&self, config: &EgressConfig) -> Result<EgressResource> {
        let mut entry = self.default_entry.lock().unwrap();
        if let Some(resource) = entry.as_ref() {
            return Ok(resource.clone());
        }

        let jar = Arc::clone(&self.default_jar);
        let client = build_client(None, config, Arc::clone(&jar))?;
        let resource = EgressResource {
            client,
            jar,
            local_addr: None,
        };
        *entry = Some(resource.clone());
        Ok(resource)
    }

    /// Drop all per-address resources.
    ///
    /// Called when the address pool grows: the index-to-address mapping has
    /// changed, so cached entries can no longer be trusted. Dispatch cursors
    /// are deliberately left alone (see `EgressManager::set_option`).
    pub(crate) fn invalidate(&self) {
        let mut entries = self.entries.lock().unwrap();
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            info!("invalidated {dropped} cached egress resource(s) after pool change");
        }
    }

    /// Expire every cookie matching `url` in the default jar and in each
    /// cached per-address jar.
    ///
    /// Runs under the cache lock so no per-address jar can be added while
    /// the sweep is in progress.
    pub(crate) fn expire_cookies(&self, url: &Url) -> Result<()> {
        let entries = self.entries.lock().unwrap();

        cookies::expire_matching(&self.default_jar, url)?;
        for resource in entries.values() {
            cookies::expire_matching(&resource.jar, url)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Resolve a configured egress address to a local IP.
///
/// Plain IP literals avoid the resolver entirely; anything else goes through
/// the system resolver with port 0.
pub(crate) fn resolve_local_addr(address: &str) -> Result<IpAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut resolved =
        (address, 0u16)
            .to_socket_addrs()
            .map_err(|source| ErrorKind::AddressResolution {
                address: address.to_string(),
                source,
            })?;

    resolved
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ErrorKind::AddressResolution {
            address: address.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "address resolved to no usable IP",
            ),
        })
}

/// Build a client bound to `local_addr` (or the default route) with the
/// given jar and the currently configured timeouts and policies.
pub(crate) fn build_client(
    local_addr: Option<IpAddr>,
    config: &EgressConfig,
    jar: Arc<CookieStoreMutex>,
) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(config.user_agent.clone())
        .cookie_provider(jar)
        .local_address(local_addr)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        // Zero keeps no idle sockets around at all, which is how keep-alive
        // is disabled when many egress addresses would otherwise each hold
        // their own idle pool.
        .pool_max_idle_per_host(config.max_idle_per_host)
        .redirect(redirect_policy(config.max_redirects))
        .build()
        .map_err(ErrorKind::BuildClient)
}

/// Redirect policy failing once the hop count exceeds `max_redirects`.
///
/// The error surfaces through `reqwest::Error` with
/// [`ErrorKind::RedirectLimit`] in its source chain.
pub(crate) fn redirect_policy(max_redirects: usize) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error(ErrorKind::RedirectLimit { max: max_redirects })
        } else {
            attempt.follow()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ip_literal() {
        assert_eq!(
            resolve_local_addr("10.0.0.1").unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_local_addr("::1").unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_resolve_failure_is_surfaced() {
        let result = resolve_local_addr("");
        assert!(matches!(
            result,
            Err(ErrorKind::AddressResolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_or_create_returns_cached_instance() {
        let cache = ResourceCache::new();
        let config = EgressConfig::default();

        let first = cache.get_or_create("127.0.0.1", &config).unwrap();
        let second = cache.get_or_create("127.0.0.1", &config).unwrap();

        // Same cached pair, not a fresh construction
        assert!(Arc::ptr_eq(&first.jar, &second.jar));
        assert_eq!(cache.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_addresses_get_distinct_jars() {
        let cache = ResourceCache::new();
        let config = EgressConfig::default();

        let first = cache.get_or_create("127.0.0.1", &config).unwrap();
        let second = cache.get_or_create("127.0.0.2", &config).unwrap();

        assert!(!Arc::ptr_eq(&first.jar, &second.jar));
        assert_eq!(cache.cached_len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_per_address_entries() {
        let cache = ResourceCache::new();
        let config = EgressConfig::default();

        cache.get_or_create("127.0.0.1", &config).unwrap();
        let default_before = cache.default_resource(&config).unwrap();
        cache.invalidate();

        assert_eq!(cache.cached_len(), 0);
        // The default resource is untouched by pool invalidation
        let default_after = cache.default_resource(&config).unwrap();
        assert!(Arc::ptr_eq(&default_before.jar, &default_after.jar));
    }

    #[tokio::test]
    async fn test_default_resource_uses_default_jar() {
        let cache = ResourceCache::new();
        let config = EgressConfig::default();

        let resource = cache.default_resource(&config).unwrap();
        assert!(Arc::ptr_eq(&resource.jar, cache.default_jar()));
        assert_eq!(resource.local_addr, None);
    }

    #[tokio::test]
    async fn test_expire_cookies_sweeps_all_jars() {
        let cache = ResourceCache::new();
        let config = EgressConfig::default();
        let url = Url::parse("https://example.com/").unwrap();

        let resource = cache.get_or_create("127.0.0.1", &config).unwrap();
        resource.jar.lock().unwrap().parse("a=1", &url).unwrap();
        cache.default_jar().lock().unwrap().parse("b=2", &url).unwrap();

        cache.expire_cookies(&url).unwrap();

        assert!(resource.jar.lock().unwrap().matches(&url).is_empty());
        assert!(cache.default_jar().lock().unwrap().matches(&url).is_empty());
    }
}
