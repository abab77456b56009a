//! Rate-limited outbound REST client (§4.2): three named token buckets plus
//! exponential-backoff retry on throttling.
//!
//! Grounded on `scrapers::dome_tracker::DomeClient::retry_request` — same
//! backoff shape (double, cap, bounded attempts) — generalized from one
//! fixed-delay gate to a proper token bucket per named pool.

use crate::config::{ClobRateLimitsConfig, RateLimitBucketConfig};
use crate::error::EngineError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 6;
const INITIAL_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 32_000;

pub struct TokenBucket {
    max_tokens: f64,
    window_ms: f64,
    inner: Mutex<TokenBucketInner>,
}

struct TokenBucketInner {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl TokenBucket {
    pub fn new(config: RateLimitBucketConfig) -> Self {
        Self {
            max_tokens: config.max_tokens as f64,
            window_ms: config.window_ms as f64,
            inner: Mutex::new(TokenBucketInner {
                tokens: config.max_tokens as f64,
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
            }),
        }
    }

    fn refill(&self, inner: &mut TokenBucketInner) {
        let elapsed_ms = inner.last_refill.elapsed().as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return;
        }
        let add = (elapsed_ms / self.window_ms * self.max_tokens).floor();
        if add > 0.0 {
            inner.tokens = (inner.tokens + add).min(self.max_tokens);
            inner.last_refill = Instant::now();
        }
    }

    /// Consumes one token, waiting (FIFO) if none are available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                self.refill(&mut inner);
                if inner.tokens >= 1.0 && inner.waiters.is_empty() {
                    inner.tokens -= 1.0;
                    return;
                }
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(tx);
                let per_token_ms = (self.window_ms / self.max_tokens).max(1.0);
                (rx, Duration::from_millis(per_token_ms as u64))
            };
            let (rx, delay) = wait;
            tokio::select! {
                _ = rx => {}
                _ = sleep(delay) => {}
            }
            let mut inner = self.inner.lock().await;
            self.refill(&mut inner);
            if inner.tokens >= 1.0 {
                inner.tokens -= 1.0;
                if let Some(next) = inner.waiters.pop_front() {
                    let _ = next.send(());
                }
                return;
            }
        }
    }
}

pub struct RestClient {
    http: Client,
    base_url: String,
    general: TokenBucket,
    book: TokenBucket,
    trades: TokenBucket,
}

impl RestClient {
    pub fn new(base_url: String, rate_limits: ClobRateLimitsConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url,
            general: TokenBucket::new(rate_limits.general),
            book: TokenBucket::new(rate_limits.book),
            trades: TokenBucket::new(rate_limits.trades),
        })
    }

    pub async fn get_order_book(&self, asset_id: &str, level: Option<&str>) -> Result<serde_json::Value, EngineError> {
        self.book.acquire().await;
        let mut query = vec![("token_id", asset_id.to_string())];
        if let Some(level) = level {
            query.push(("level", level.to_string()));
        }
        self.get("/book", &query).await
    }

    pub async fn get_trades(
        &self,
        maker: Option<&str>,
        market: Option<&str>,
        limit: Option<u32>,
        before: Option<i64>,
        after: Option<i64>,
    ) -> Result<serde_json::Value, EngineError> {
        self.trades.acquire().await;
        let mut query = Vec::new();
        if let Some(m) = maker {
            query.push(("maker", m.to_string()));
        }
        if let Some(m) = market {
            query.push(("market", m.to_string()));
        }
        if let Some(l) = limit {
            query.push(("limit", l.to_string()));
        }
        if let Some(b) = before {
            query.push(("before", b.to_string()));
        }
        if let Some(a) = after {
            query.push(("after", a.to_string()));
        }
        self.get("/trades", &query).await
    }

    pub async fn get_price(&self, asset_id: &str, side: Option<&str>) -> Result<serde_json::Value, EngineError> {
        self.general.acquire().await;
        let mut query = vec![("token_id", asset_id.to_string())];
        if let Some(s) = side {
            query.push(("side", s.to_string()));
        }
        self.get("/price", &query).await
    }

    pub async fn get_midpoint(&self, asset_id: &str) -> Result<serde_json::Value, EngineError> {
        self.general.acquire().await;
        self.get("/midpoint", &[("token_id", asset_id.to_string())]).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = Duration::from_millis(INITIAL_DELAY_MS);

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .get(&url)
                .header("Accept", "application/json")
                .query(query)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| EngineError::Protocol(e.to_string()));
                    } else if status.as_u16() == 429 {
                        warn!(attempt, delay_ms = backoff.as_millis() as u64, "rate limited (429)");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_millis(MAX_DELAY_MS));
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(EngineError::UpstreamHttp {
                            status: status.as_u16(),
                            body,
                        });
                    }
                }
                Err(e) => {
                    if attempt == MAX_ATTEMPTS {
                        return Err(EngineError::Transport(e.to_string()));
                    }
                    warn!(attempt, error = %e, "request failed, retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(MAX_DELAY_MS));
                }
            }
        }

        Err(EngineError::RateLimit { attempts: MAX_ATTEMPTS })
    }
}
