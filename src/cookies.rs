use std::sync::Arc;

use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::{ErrorKind, Result};

/// Create an empty cookie jar usable as a reqwest cookie provider.
///
/// Each egress address gets its own jar so sessions never leak across
/// source addresses; domain matching follows public-suffix rules via
/// `cookie_store`.
pub(crate) fn new_jar() -> Arc<CookieStoreMutex> {
    Arc::new(CookieStoreMutex::new(CookieStore::default()))
}

/// Drop every cookie in `jar` that matches `url`.
///
/// The store exposes removal rather than in-place expiry mutation, so
/// "expire and re-store" collapses to removing the matched cookies; the
/// observable result is the same: no valid cookie remains for that URL.
pub(crate) fn expire_matching(jar: &CookieStoreMutex, url: &Url) -> Result<()> {
    let mut store = jar
        .lock()
        .map_err(|e| ErrorKind::Cookies(format!("failed to lock cookie store: {e}")))?;

    let doomed: Vec<(String, String, String)> = store
        .matches(url)
        .into_iter()
        .map(|cookie| {
            // Host-only cookies carry no Domain attribute; they are stored
            // under the request host with the default path.
            let domain = cookie.domain().map_or_else(
                || url.host_str().unwrap_or_default().to_string(),
                ToString::to_string,
            );
            let path = cookie
                .path()
                .map_or_else(|| "/".to_string(), ToString::to_string);
            (domain, path, cookie.name().to_string())
        })
        .collect();

    for (domain, path, name) in doomed {
        store.remove(&domain, &path, &name);
    }

    Ok(())
}
