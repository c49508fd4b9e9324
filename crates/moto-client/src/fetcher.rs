use std::net::IpAddr;
use std::time::Duration;

use moto_core::error::AppError;
use moto_core::traits::Fetcher;
use reqwest::{Client, Response};
use url::Url;

/// The vendor serves a stripped page to unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// HTTP fetcher for vendor pages and images, using reqwest.
///
/// Pages and images get separate timeouts. Any non-2xx answer is an
/// [`AppError::HttpStatus`]. Image URLs come from scraped markup, so
/// requests to private/reserved addresses are refused unless
/// [`allow_private_urls`](Self::allow_private_urls) is called.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    page_timeout: Duration,
    image_timeout: Duration,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeouts(Duration::from_secs(30), Duration::from_secs(60))
    }

    pub fn with_timeouts(page_timeout: Duration, image_timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(page_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            page_timeout,
            image_timeout,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<Response, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let response = self.get(url, self.page_timeout).await?;
        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read page body: {e}")))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self.get(url, self.image_timeout).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read image body: {e}")))?;
        tracing::debug!(%url, size = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Refuse non-http(s) URLs and hosts resolving to private/reserved IPs.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::HttpError(format!(
            "URL scheme '{}' is not allowed (only http/https)",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;
    let blocked = || AppError::HttpError(format!("SSRF blocked: {host} is a private address"));

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return if is_private_ip(ip) { Err(blocked()) } else { Ok(()) };
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .peekable();

    if addrs.peek().is_none() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    if addrs.any(|addr| is_private_ip(addr.ip())) {
        return Err(blocked());
    }
    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_detected() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "192.168.0.10",
            "169.254.169.254",
            "100.64.0.1",
            "::1",
            "fe80::1",
            "fd00::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "93.184.216.34", "2001:4860:4860::8888"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[tokio::test]
    async fn private_literal_is_blocked() {
        let err = validate_url("http://127.0.0.1/admin").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));

        let err = validate_url("http://[::1]/admin").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn non_http_scheme_is_refused() {
        let err = validate_url("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn fetch_refuses_private_host_before_sending() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/page").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(msg) if msg.contains("SSRF")));
    }

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        let fetcher = ReqwestFetcher::with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
            .unwrap()
            .allow_private_urls();
        // Port 9 (discard) is closed on test machines.
        let err = fetcher.fetch_bytes("http://127.0.0.1:9/a.jpg").await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
