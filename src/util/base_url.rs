use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum BaseUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a remote host would expose the session cookie
    #[error("Insecure server URL: HTTPS required (except localhost for testing)")]
    Insecure,
    #[error("URL has no host")]
    MissingHost,
}

/// Validate the reader server's base URL.
///
/// HTTPS is required. Plain HTTP is accepted only for loopback hosts so that
/// tests and local development servers work.
///
/// ```
/// use feedpager::util::validate_base_url;
///
/// assert!(validate_base_url("https://newsblur.com").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8000").is_ok());
/// assert!(validate_base_url("http://newsblur.com").is_err());
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, BaseUrlError> {
    let url = Url::parse(url_str)?;

    let host = url.host_str().ok_or(BaseUrlError::MissingHost)?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback_host(host) {
                tracing::error!(base_url = %url_str, "Rejecting non-HTTPS server URL");
                return Err(BaseUrlError::Insecure);
            }
            tracing::warn!(base_url = %url_str, "Using non-HTTPS server URL (localhost only)");
        }
        scheme => return Err(BaseUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    Ok(url)
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
