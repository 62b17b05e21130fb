//! The orchestrating entry point of the crate.
//!
//! [`EgressManager`] owns the configuration store, the host delay registry,
//! the dispatch state registry and the egress resource cache, and ties them
//! together in [`EgressManager::acquire_client`]. It is an explicit context
//! object rather than package-level state, so tests (and embedders) can run
//! any number of independent instances.

use std::sync::{Mutex, RwLock};
use std::time::Duration;

use log::debug;
use tokio::time::sleep;
use url::Url;

use crate::config::{ConfigUpdate, EgressConfig};
use crate::delay::HostDelayRegistry;
use crate::dispatch::DispatchRegistry;
use crate::host::HostKey;
use crate::resource::{build_client, redirect_policy, ResourceCache};
use crate::{cookies, ErrorKind, Result};

/// The single transport reused for all proxied requests.
///
/// There is no per-proxy pooling: pointing this at a different proxy URL
/// replaces the client in place. Concurrent acquisitions through *different*
/// proxy URLs therefore race on this one slot; that risk is accepted and out
/// of scope for the proxy path.
#[derive(Debug)]
struct ProxyResource {
    url: Url,
    client: reqwest::Client,
}

/// Hands out ready-to-use HTTP clients, rotating egress addresses and
/// enforcing per-host minimum spacing between dispatches.
///
/// All registries are independently lockable and no two of their locks are
/// ever held at once, except that the dispatch critical section reads the
/// host delay registry and the configuration store, both of which are strict
/// leaves (they never take another lock themselves). The only suspension
/// point is the deliberate rate-limit sleep, performed outside all locks.
#[derive(Debug)]
pub struct EgressManager {
    config: RwLock<EgressConfig>,
    delays: HostDelayRegistry,
    dispatch: DispatchRegistry,
    resources: ResourceCache,
    proxy: Mutex<Option<ProxyResource>>,
}

impl Default for EgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EgressManager {
    /// Create a manager with default configuration: empty address pool, no
    /// baseline spacing, keep-alive disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EgressConfig::default())
    }

    /// Create a manager from an explicit configuration.
    #[must_use]
    pub fn with_config(config: EgressConfig) -> Self {
        Self {
            config: RwLock::new(config),
            delays: HostDelayRegistry::default(),
            dispatch: DispatchRegistry::default(),
            resources: ResourceCache::new(),
            proxy: Mutex::new(None),
        }
    }

    /// Merge a partial configuration update into the live configuration.
    ///
    /// Appending egress addresses invalidates the per-address resource
    /// cache: the index-to-address mapping is no longer the one cached
    /// entries were built against. Dispatch cursors are NOT reset, so for a
    /// short window an in-flight cursor may select a reinterpreted pool
    /// slot. That matches the historical behavior; whether pool growth
    /// should also reset cursors is left open upstream, so it is preserved
    /// here rather than silently changed.
    ///
    /// Timeouts, user agent and the redirect cap are baked into clients at
    /// construction time, so already-cached per-address clients keep their
    /// old values until the cache is next invalidated by pool growth; only
    /// clients built afterwards pick up the new settings.
    pub fn set_option(&self, update: ConfigUpdate) {
        let pool_grew = {
            let mut config = self.config.write().unwrap();
            config.apply(update)
        };
        if pool_grew {
            self.resources.invalidate();
        }
    }

    /// A snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> EgressConfig {
        self.config.read().unwrap().clone()
    }

    /// Raise the minimum inter-request spacing for one destination host.
    ///
    /// Values only ever increase; a later call with a shorter delay leaves
    /// the stored value alone.
    pub fn set_host_delay(&self, host: impl Into<HostKey>, delay: Duration) {
        self.delays.set(host.into(), delay);
    }

    /// The effective minimum spacing for one destination host: its override
    /// if present, the configured default otherwise.
    #[must_use]
    pub fn get_host_delay(&self, host: impl Into<HostKey>) -> Duration {
        let host = host.into();
        self.delays
            .get(&host)
            .unwrap_or_else(|| self.config.read().unwrap().default_delay)
    }

    /// Acquire a client for `target_url`.
    ///
    /// Without a proxy this reserves the host's next dispatch slot, sleeps
    /// out any required spacing (outside all locks), resolves the egress
    /// address for the reserved rotation slot and returns a client backed by
    /// that address's cached transport. With `use_shared_jar` the client
    /// also shares the address's cookie jar; otherwise it gets a brand-new
    /// empty jar bound to the same address for per-acquisition cookie
    /// isolation.
    ///
    /// With `proxy_url` set, the single shared proxy resource is created or
    /// re-pointed and returned with the default shared jar; `use_shared_jar`
    /// is ignored and no per-host spacing applies.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidUrl`] for a malformed target or proxy URL
    /// - [`ErrorKind::MissingHost`] when the target URL has no hostname
    /// - [`ErrorKind::AddressResolution`] when the selected egress address
    ///   does not resolve
    /// - [`ErrorKind::BuildClient`] when client construction fails
    ///
    /// An error does not roll back the rotation: an aborted dispatch still
    /// consumes its slot, so a retry moves on to the next egress address.
    pub async fn acquire_client(
        &self,
        target_url: &str,
        proxy_url: Option<&str>,
        use_shared_jar: bool,
    ) -> Result<reqwest::Client> {
        if let Some(proxy) = proxy_url.filter(|p| !p.is_empty()) {
            return self.proxied_client(proxy);
        }

        let url = Url::parse(target_url)
            .map_err(|e| ErrorKind::InvalidUrl(target_url.to_string(), e))?;
        let host = HostKey::try_from(&url)?;

        // Snapshot pool and settings in one read so the slot lookup below
        // cannot see a different pool than the modulo did.
        let config = self.config.read().unwrap().clone();

        let decision = self.dispatch.reserve(&host, config.addresses.len(), || {
            self.delays.get(&host).unwrap_or(config.default_delay)
        });

        if !decision.wait.is_zero() {
            debug!(
                "host {host}: delaying dispatch by {}ms",
                decision.wait.as_millis()
            );
            sleep(decision.wait).await;
        }

        let resource = if config.addresses.is_empty() {
            self.resources.default_resource(&config)?
        } else {
            self.resources
                .get_or_create(&config.addresses[decision.slot], &config)?
        };

        if use_shared_jar {
            Ok(resource.client)
        } else {
            // Same egress binding, fresh empty jar.
            build_client(resource.local_addr, &config, cookies::new_jar())
        }
    }

    /// Expire every cookie matching `url_str` in the default jar and in all
    /// cached per-address jars. Used to force re-authentication flows.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidUrl`] for malformed input and
    /// [`ErrorKind::Cookies`] if a jar cannot be locked.
    pub fn reset_cookies(&self, url_str: &str) -> Result<()> {
        let url =
            Url::parse(url_str).map_err(|e| ErrorKind::InvalidUrl(url_str.to_string(), e))?;
        self.resources.expire_cookies(&url)
    }

    /// Create or re-point the single shared proxy resource.
    fn proxied_client(&self, proxy_url: &str) -> Result<reqwest::Client> {
        let url =
            Url::parse(proxy_url).map_err(|e| ErrorKind::InvalidUrl(proxy_url.to_string(), e))?;
        let config = self.config.read().unwrap().clone();

        let mut slot = self.proxy.lock().unwrap();
        if let Some(resource) = slot.as_ref() {
            if resource.url == url {
                return Ok(resource.client.clone());
            }
            debug!("re-pointing proxy resource from {} to {url}", resource.url);
        }

        let proxy = reqwest::Proxy::all(url.clone()).map_err(ErrorKind::BuildClient)?;
        let jar = std::sync::Arc::clone(self.resources.default_jar());
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .cookie_provider(jar)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(redirect_policy(config.max_redirects))
            .proxy(proxy)
            .build()
            .map_err(ErrorKind::BuildClient)?;

        *slot = Some(ProxyResource {
            url,
            client: client.clone(),
        });
        Ok(client)
    }
}
