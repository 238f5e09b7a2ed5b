use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::FetchError;

const MAX_ATTEMPTS: u32 = 3;

/// Realistic browser header sets, rotated per request in scraping contexts.
const BROWSER_HEADER_SETS: &[&[(&str, &str)]] = &[
    &[
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.9,ru;q=0.8"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
    ],
    &[
        (
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Upgrade-Insecure-Requests", "1"),
    ],
    &[
        (
            "User-Agent",
            "Mozilla/5.0 (X11; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
        ("Accept-Language", "en-GB,en;q=0.9,en-US;q=0.8"),
        ("DNT", "1"),
    ],
];

/// Sliding-window rate limiter for API-style POST traffic.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while let Some(front) = calls.front() {
                    if now.duration_since(*front) >= self.window {
                        calls.pop_front();
                    } else {
                        break;
                    }
                }
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }
                self.window - now.duration_since(*calls.front().expect("non-empty"))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Fully-read HTTP response. Bodies are consumed while the connection
/// permits are held so the pool caps stay meaningful.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn retry_after(&self) -> Option<u64> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

/// Shared pooled HTTP client: one reqwest client per process, a global
/// connection cap plus per-host caps, transparent retry with backoff on
/// transient failures, and a token bucket in front of POST traffic.
pub struct HttpClient {
    client: reqwest::Client,
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_per_host: usize,
    post_limiter: RateLimiter,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let request_timeout =
            humantime::parse_duration(&config.request_timeout).unwrap_or(Duration::from_secs(30));
        let connect_timeout =
            humantime::parse_duration(&config.connect_timeout).unwrap_or(Duration::from_secs(10));

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(config.max_per_host as usize)
            .user_agent(concat!("vestnik/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            global: Arc::new(Semaphore::new(config.max_connections as usize)),
            per_host: Mutex::new(HashMap::new()),
            max_per_host: config.max_per_host as usize,
            post_limiter: RateLimiter::new(config.post_rate_per_sec as usize, Duration::from_secs(1)),
        })
    }

    async fn host_permit(&self, url: &str) -> Arc<Semaphore> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();
        let mut map = self.per_host.lock().await;
        map.entry(host)
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
            .clone()
    }

    /// GET with retry on transient failure. Non-2xx statuses are returned
    /// to the caller, who owns the retry policy for them.
    pub async fn get(&self, url: &str, headers: Option<HeaderMap>) -> Result<HttpResponse, FetchError> {
        let host_sem = self.host_permit(url).await;
        let _global = self.global.acquire().await.expect("semaphore open");
        let _host = host_sem.acquire().await.expect("semaphore open");

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.get(url);
            if let Some(ref h) = headers {
                request = request.headers(h.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let resp_headers = response.headers().clone();
                    match response.text().await {
                        Ok(body) => {
                            return Ok(HttpResponse {
                                status,
                                headers: resp_headers,
                                body,
                            });
                        }
                        Err(e) => {
                            last_err = Some(e);
                            continue;
                        }
                    }
                }
                Err(e) if is_transient(&e) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => {
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(FetchError::Transient {
            url: url.to_string(),
            source: last_err.expect("at least one attempt"),
        })
    }

    /// POST JSON through the global rate limiter, with the same retry policy.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: Option<HeaderMap>,
    ) -> Result<HttpResponse, FetchError> {
        self.post_limiter.acquire().await;

        let host_sem = self.host_permit(url).await;
        let _global = self.global.acquire().await.expect("semaphore open");
        let _host = host_sem.acquire().await.expect("semaphore open");

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retrying POST");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(ref h) = headers {
                request = request.headers(h.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let resp_headers = response.headers().clone();
                    match response.text().await {
                        Ok(text) => {
                            return Ok(HttpResponse {
                                status,
                                headers: resp_headers,
                                body: text,
                            });
                        }
                        Err(e) => {
                            last_err = Some(e);
                            continue;
                        }
                    }
                }
                Err(e) if is_transient(&e) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => {
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(FetchError::Transient {
            url: url.to_string(),
            source: last_err.expect("at least one attempt"),
        })
    }

    /// GET and return the body, failing on non-success statuses.
    pub async fn fetch_text(&self, url: &str, headers: Option<HeaderMap>) -> Result<String, FetchError> {
        let response = self.get(url, headers).await?;
        match response.status {
            200..=299 => Ok(response.body),
            429 => Err(FetchError::RateLimited {
                retry_after: response.retry_after(),
            }),
            status => {
                warn!(url, status, "fetch_text non-success status");
                Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                })
            }
        }
    }

    /// GET and parse the body as JSON, failing on non-success statuses.
    pub async fn fetch_json(&self, url: &str, headers: Option<HeaderMap>) -> Result<serde_json::Value, FetchError> {
        let body = self.fetch_text(url, headers).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

/// Exponential backoff clamped to the 4-10s band, plus jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = (1u64 << attempt).clamp(4, 10);
    let jitter = rand::rng().random_range(0.0..1.0_f64);
    Duration::from_millis(base * 1000 + (jitter * 1000.0) as u64)
}

/// One of the rotating realistic browser header sets.
pub fn browser_headers() -> HeaderMap {
    let set = BROWSER_HEADER_SETS
        .choose(&mut rand::rng())
        .expect("non-empty header sets");
    let mut headers = HeaderMap::new();
    for (name, value) in *set {
        if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Anti-cache additions used on scraping retries.
pub fn anti_cache_headers(headers: &mut HeaderMap) {
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Pragma", HeaderValue::from_static("no-cache"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_enforces_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await; // must wait for the window to roll
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn backoff_stays_in_band() {
        for attempt in 1..MAX_ATTEMPTS {
            let d = backoff_delay(attempt);
            assert!(d >= Duration::from_secs(4));
            assert!(d <= Duration::from_secs(11));
        }
    }

    #[test]
    fn browser_headers_have_user_agent() {
        for _ in 0..10 {
            let headers = browser_headers();
            assert!(headers.contains_key("user-agent"));
        }
    }

    #[test]
    fn anti_cache_adds_no_cache() {
        let mut headers = browser_headers();
        anti_cache_headers(&mut headers);
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    }
}
