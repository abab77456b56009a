//! Env-driven configuration, grounded on the reference backend's
//! `Config::from_env` pattern: read each var with a typed default, optionally
//! preceded by a `.env` load.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PolymarketConfig {
    pub ws_url: String,
    pub clob_url: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitBucketConfig {
    pub max_tokens: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ClobRateLimitsConfig {
    pub general: RateLimitBucketConfig,
    pub book: RateLimitBucketConfig,
    pub trades: RateLimitBucketConfig,
}

#[derive(Debug, Clone)]
pub struct FreshWalletConfig {
    pub weight: f64,
    pub max_age_days: f64,
    pub max_trades: u64,
    pub min_trade_size: f64,
}

#[derive(Debug, Clone)]
pub struct LiquidityImpactConfig {
    pub weight: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct WalletAccuracyConfig {
    pub weight: f64,
    pub min_win_rate: f64,
    pub min_resolved_positions: u64,
}

#[derive(Debug, Clone)]
pub struct TimingPatternConfig {
    pub weight: f64,
    pub window_hours: f64,
    pub concentration_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct SniperClusterConfig {
    pub weight: f64,
    pub window_minutes: i64,
    pub min_wallets: usize,
}

#[derive(Debug, Clone)]
pub struct SignalsConfig {
    pub fresh_wallet: FreshWalletConfig,
    pub liquidity_impact: LiquidityImpactConfig,
    pub wallet_accuracy: WalletAccuracyConfig,
    pub timing_pattern: TimingPatternConfig,
    pub sniper_cluster: SniperClusterConfig,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub profile_refresh_interval_ms: u64,
    pub history_lookback_days: u64,
    pub max_tracked_wallets: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub realtime: RealtimeConfig,
    pub polymarket: PolymarketConfig,
    pub clob_rate_limits: ClobRateLimitsConfig,
    pub signals: SignalsConfig,
    pub wallet: WalletConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            data_dir: env_string_or("DATA_DIR", "./data"),
            realtime: RealtimeConfig {
                enabled: env_or("REALTIME_ENABLED", true),
                reconnect_attempts: env_or("RECONNECT_ATTEMPTS", 10),
                reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", 5_000),
                heartbeat_interval_ms: env_or("HEARTBEAT_INTERVAL_MS", 30_000),
            },
            polymarket: PolymarketConfig {
                ws_url: env_string_or(
                    "POLYMARKET_WS_URL",
                    "wss://ws-subscriptions-clob.polymarket.com/ws/market",
                ),
                clob_url: env_string_or("POLYMARKET_CLOB_URL", "https://clob.polymarket.com"),
                base_url: env_string_or("POLYMARKET_BASE_URL", "https://clob.polymarket.com"),
            },
            clob_rate_limits: ClobRateLimitsConfig {
                general: RateLimitBucketConfig {
                    max_tokens: env_or("CLOB_RATE_LIMIT_GENERAL_MAX", 9_000),
                    window_ms: env_or("CLOB_RATE_LIMIT_GENERAL_WINDOW_MS", 10_000),
                },
                book: RateLimitBucketConfig {
                    max_tokens: env_or("CLOB_RATE_LIMIT_BOOK_MAX", 1_500),
                    window_ms: env_or("CLOB_RATE_LIMIT_BOOK_WINDOW_MS", 10_000),
                },
                trades: RateLimitBucketConfig {
                    max_tokens: env_or("CLOB_RATE_LIMIT_TRADES_MAX", 200),
                    window_ms: env_or("CLOB_RATE_LIMIT_TRADES_WINDOW_MS", 10_000),
                },
            },
            signals: SignalsConfig {
                fresh_wallet: FreshWalletConfig {
                    weight: env_or("SIGNALS_FRESH_WALLET_WEIGHT", 0.15),
                    max_age_days: env_or("SIGNALS_FRESH_WALLET_MAX_AGE_DAYS", 7.0),
                    max_trades: env_or("SIGNALS_FRESH_WALLET_MAX_TRADES", 10),
                    min_trade_size: env_or("SIGNALS_FRESH_WALLET_MIN_TRADE_SIZE", 0.02),
                },
                liquidity_impact: LiquidityImpactConfig {
                    weight: env_or("SIGNALS_LIQUIDITY_IMPACT_WEIGHT", 0.12),
                    threshold: env_or("SIGNALS_LIQUIDITY_IMPACT_THRESHOLD", 0.02),
                },
                wallet_accuracy: WalletAccuracyConfig {
                    weight: env_or("SIGNALS_WALLET_ACCURACY_WEIGHT", 0.18),
                    min_win_rate: env_or("SIGNALS_WALLET_ACCURACY_MIN_WIN_RATE", 0.7),
                    min_resolved_positions: env_or(
                        "SIGNALS_WALLET_ACCURACY_MIN_RESOLVED_POSITIONS",
                        20,
                    ),
                },
                timing_pattern: TimingPatternConfig {
                    weight: env_or("SIGNALS_TIMING_PATTERN_WEIGHT", 0.14),
                    window_hours: env_or("SIGNALS_TIMING_PATTERN_WINDOW_HOURS", 48.0),
                    concentration_threshold: env_or(
                        "SIGNALS_TIMING_PATTERN_CONCENTRATION_THRESHOLD",
                        2.0,
                    ),
                },
                sniper_cluster: SniperClusterConfig {
                    weight: env_or("SIGNALS_SNIPER_CLUSTER_WEIGHT", 0.16),
                    window_minutes: env_or("SIGNALS_SNIPER_CLUSTER_WINDOW_MINUTES", 5),
                    min_wallets: env_or("SIGNALS_SNIPER_CLUSTER_MIN_WALLETS", 3),
                },
            },
            wallet: WalletConfig {
                profile_refresh_interval_ms: env_or(
                    "WALLET_PROFILE_REFRESH_INTERVAL_MS",
                    3_600_000,
                ),
                history_lookback_days: env_or("WALLET_HISTORY_LOOKBACK_DAYS", 90),
                max_tracked_wallets: env_or("WALLET_MAX_TRACKED_WALLETS", 10_000),
            },
        }
    }
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
