use thiserror::Error;
use url::Url;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Possible errors when interacting with `egressor`.
///
/// The egress manager never retries internally; every error is surfaced to
/// the caller as-is. Partial dispatch state (an already-advanced rotation
/// cursor) is deliberately not rolled back on error, so a retried request
/// naturally moves on to the next egress address.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The given string cannot be parsed as a target or proxy URL.
    #[error("cannot parse `{0}` as a URL: {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    /// The target URL carries no host to key dispatch state against.
    #[error("URL `{0}` has no host")]
    MissingHost(Url),

    /// A configured egress address cannot be resolved to a local IP.
    #[error("cannot resolve egress address `{address}`")]
    AddressResolution {
        /// The configured address that failed to resolve
        address: String,
        /// Underlying resolver error
        #[source]
        source: std::io::Error,
    },

    /// A request followed more redirect hops than the configured maximum.
    ///
    /// Produced by the redirect policy of acquired clients; reqwest reports
    /// it as a redirect error with this value in its source chain.
    #[error("redirect limit of {max} hops exceeded")]
    RedirectLimit {
        /// The configured maximum number of hops
        max: usize,
    },

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    BuildClient(#[source] reqwest::Error),

    /// A cookie store could not be locked or updated.
    #[error("cookie store error: {0}")]
    Cookies(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_display() {
        let err = url::Url::parse("not a url").unwrap_err();
        let kind = ErrorKind::InvalidUrl("not a url".to_string(), err);
        assert!(kind.to_string().contains("not a url"));
    }

    #[test]
    fn test_redirect_limit_display() {
        let kind = ErrorKind::RedirectLimit { max: 5 };
        assert_eq!(kind.to_string(), "redirect limit of 5 hops exceeded");
    }
}
