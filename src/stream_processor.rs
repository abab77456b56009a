//! Stream processor orchestrator (§4.11): wires the subscription feed into
//! the book/wallet/signal pipeline.
//!
//! Grounded on `main.rs`'s module-wiring style and on
//! `scrapers::polymarket_book_store::HftBookCache`'s facade pattern of
//! combining a book store with a subscription manager behind one struct that
//! owns its event-draining task. Per-asset ordering (§5) is achieved by
//! routing each inbound message to one of a fixed pool of workers chosen by
//! `consistent_hash(assetId) % worker_count`: two messages for the same
//! asset always land on the same worker and are applied in arrival order,
//! while different assets process concurrently across workers.

use crate::analyzer::OrderBookAnalyzer;
use crate::config::Config;
use crate::liquidity::LiquidityTracker;
use crate::models::{Direction, MarketContext, Side, Trade};
use crate::orderbook::OrderBookManager;
use crate::rest_client::RestClient;
use crate::signals::SignalRegistry;
use crate::storage::Storage;
use crate::subscription::{InboundEvent, SubscriptionClient, SubscriptionKind};
use crate::wallet::{FundingAnalyzer, WalletTracker};
use crate::whale::{ProbabilityAdjuster, WhaleDetector};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const WORKER_COUNT: usize = 8;
const SIGNIFICANT_PRICE_DELTA: f64 = 0.05;
const LIQUIDITY_DROP_THRESHOLD: f64 = 20.0;

fn consistent_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

enum WorkerJob {
    Trade(Value),
    Book {
        asset_id: String,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        timestamp: DateTime<Utc>,
        hash: Option<String>,
    },
    PriceChange {
        asset_id: String,
        price: f64,
        size: f64,
        side: Side,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorCounters {
    pub processed_trades: u64,
    pub detected_signals: u64,
}

/// Stateful orchestrator (§4.11): running flag, processor counters, and
/// every collaborator behind an `Arc` so workers and the event-drain task
/// can all hold a handle.
pub struct StreamProcessor {
    config: Config,
    #[allow(dead_code)]
    rest_client: Arc<RestClient>,
    storage: Arc<Storage>,
    subscription: Arc<SubscriptionClient>,
    books: Arc<OrderBookManager>,
    wallets: Arc<WalletTracker>,
    funding: Arc<RwLock<FundingAnalyzer>>,
    liquidity: Arc<LiquidityTracker>,
    whale_detector: WhaleDetector,
    probability_adjuster: Arc<ProbabilityAdjuster>,
    signals: Arc<SignalRegistry>,
    markets: Arc<RwLock<HashMap<String, MarketContext>>>,
    running: AtomicBool,
    processed_trades: AtomicU64,
    detected_signals: AtomicU64,
    start_time: RwLock<Option<DateTime<Utc>>>,
    workers: RwLock<Vec<mpsc::UnboundedSender<WorkerJob>>>,
}

impl StreamProcessor {
    pub fn new(
        config: Config,
        storage: Arc<Storage>,
        rest_client: Arc<RestClient>,
        subscription: Arc<SubscriptionClient>,
    ) -> Arc<Self> {
        let signals = Arc::new(SignalRegistry::new(storage.clone(), &config.signals));
        let min_trade_size = config.signals.fresh_wallet.min_trade_size;
        Arc::new(Self {
            wallets: Arc::new(WalletTracker::new(storage.clone(), min_trade_size)),
            config,
            rest_client,
            storage,
            subscription,
            books: Arc::new(OrderBookManager::new()),
            funding: Arc::new(RwLock::new(FundingAnalyzer::new())),
            liquidity: Arc::new(LiquidityTracker::new()),
            whale_detector: WhaleDetector::default(),
            probability_adjuster: Arc::new(ProbabilityAdjuster::default()),
            signals,
            markets: Arc::new(RwLock::new(HashMap::new())),
            running: AtomicBool::new(false),
            processed_trades: AtomicU64::new(0),
            detected_signals: AtomicU64::new(0),
            start_time: RwLock::new(None),
            workers: RwLock::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> ProcessorCounters {
        ProcessorCounters {
            processed_trades: self.processed_trades.load(Ordering::Relaxed),
            detected_signals: self.detected_signals.load(Ordering::Relaxed),
        }
    }

    /// Markets are registered out-of-band (from event/market storage, not
    /// modeled in this crate) before `start()` decides what to subscribe to.
    pub fn register_market(&self, market: MarketContext) {
        self.markets.write().insert(market.token_id.clone(), market);
    }

    fn market_context(&self, asset_id: &str) -> MarketContext {
        self.markets
            .read()
            .get(asset_id)
            .cloned()
            .unwrap_or_else(|| MarketContext {
                event_id: asset_id.to_string(),
                market_id: asset_id.to_string(),
                token_id: asset_id.to_string(),
                liquidity: 0.0,
                end_date: None,
            })
    }

    fn spawn_workers(self: &Arc<Self>) -> Vec<mpsc::UnboundedSender<WorkerJob>> {
        (0..WORKER_COUNT)
            .map(|_| {
                let (tx, mut rx) = mpsc::unbounded_channel::<WorkerJob>();
                let this = self.clone();
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        this.run_job(job).await;
                    }
                });
                tx
            })
            .collect()
    }

    fn route(&self, asset_id: &str, job: WorkerJob) {
        let workers = self.workers.read();
        if workers.is_empty() {
            return;
        }
        let idx = (consistent_hash(asset_id) as usize) % workers.len();
        let _ = workers[idx].send(job);
    }

    async fn run_job(self: &Arc<Self>, job: WorkerJob) {
        match job {
            WorkerJob::Trade(raw) => self.process_trade(&raw).await,
            WorkerJob::Book {
                asset_id,
                bids,
                asks,
                timestamp,
                hash,
            } => {
                self.books.handle_book_snapshot(&asset_id, &bids, &asks, timestamp, hash);
                self.process_order_book_update(&asset_id).await;
            }
            WorkerJob::PriceChange { asset_id, price, size, side } => {
                let before = self.books.get(&asset_id).map(|b| b.read().spread().mid_price);
                self.books.handle_price_change(&asset_id, price, size, side, Utc::now());
                if let Some(before) = before {
                    if before > 0.0 {
                        let after = self.books.get(&asset_id).map(|b| b.read().spread().mid_price).unwrap_or(before);
                        let delta = (after - before).abs() / before;
                        if delta > SIGNIFICANT_PRICE_DELTA {
                            info!(asset_id, delta_percent = delta * 100.0, "significant price move");
                        }
                    }
                }
            }
        }
    }

    /// §4.11 `start()`. No-op if realtime is disabled in config. Connects
    /// the subscription client, subscribes to every registered market, and
    /// spawns the worker pool plus the event-drain task. Failures are
    /// logged; the process stays up either way.
    pub fn start(self: &Arc<Self>, mut event_rx: mpsc::UnboundedReceiver<InboundEvent>) {
        if !self.config.realtime.enabled {
            info!("realtime disabled in config, stream processor not starting");
            return;
        }

        *self.workers.write() = self.spawn_workers();
        self.running.store(true, Ordering::Relaxed);
        *self.start_time.write() = Some(Utc::now());
        self.subscription.connect();

        for asset_id in self.markets.read().keys() {
            if let Err(e) = self
                .subscription
                .subscribe(asset_id, vec![SubscriptionKind::Book, SubscriptionKind::PriceChange])
            {
                warn!(asset_id, error = %e, "failed to subscribe at startup");
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                this.dispatch(event);
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.subscription.disconnect();
    }

    /// Extracts the routing key for keyed events and hands them to a
    /// worker; global connection-state events are handled inline.
    fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::LastTradePrice(raw) => {
                if let Some(asset_id) = Trade::from_raw(&raw).map(|t| t.asset_id) {
                    self.route(&asset_id, WorkerJob::Trade(raw));
                }
            }
            InboundEvent::Book {
                asset_id,
                bids,
                asks,
                timestamp,
                hash,
            } => self.route(
                &asset_id.clone(),
                WorkerJob::Book {
                    asset_id,
                    bids,
                    asks,
                    timestamp,
                    hash,
                },
            ),
            InboundEvent::PriceChange { asset_id, price, size, side } => self.route(
                &asset_id.clone(),
                WorkerJob::PriceChange { asset_id, price, size, side },
            ),
            InboundEvent::Disconnected { reason } => {
                warn!(reason, "feed disconnected, clearing all order books");
                self.books.clear_all();
            }
            InboundEvent::Connected => info!("feed (re)connected"),
            InboundEvent::ProtocolError(e) => warn!(error = e, "protocol error from feed"),
            InboundEvent::TerminalError(e) => warn!(error = e, "subscription client terminated"),
            InboundEvent::TickSizeChange(_) | InboundEvent::Message { .. } => {}
        }
    }

    /// §4.11 `processTrade`: normalize, record, track wallet, run real-time
    /// processors, persist detections. Per-processor errors don't stop the
    /// trade from being counted.
    pub async fn process_trade(self: &Arc<Self>, raw: &Value) {
        let Some(trade) = Trade::from_raw(raw) else {
            warn!("dropping trade with unparseable shape");
            return;
        };

        self.storage.record_trade(trade.clone());
        self.processed_trades.fetch_add(1, Ordering::Relaxed);

        let profile = if trade.wallet_address().is_some() {
            self.wallets.track_trade(&trade).ok()
        } else {
            None
        };

        let market = self.market_context(&trade.asset_id);
        let history = self.storage.trades_for_asset(&trade.asset_id, 10_000);
        let book_handle = self.books.get(&trade.asset_id);
        let book_guard = book_handle.as_ref().map(|b| b.read());
        let funding = self.funding.read();

        if let Some(book) = book_guard.as_deref() {
            if book.initialized {
                if let Some(whale) =
                    self.whale_detector
                        .analyze_trade(&trade.asset_id, trade.price, trade.size, trade.side, book)
                {
                    self.probability_adjuster.record_whale_trade(&whale);
                    self.storage.record_whale_trade(whale).await;
                }
            }
        }

        let signals = self.signals.process_real_time_trade(
            &market.event_id,
            &market,
            &trade,
            book_guard.as_deref(),
            profile.as_ref(),
            &history,
            Some(&funding),
        );

        for signal in signals {
            self.detected_signals.fetch_add(1, Ordering::Relaxed);
            self.storage
                .record_detected_pattern(crate::models::DetectedPattern {
                    id: format!(
                        "{}-{}",
                        signal.signal_type,
                        Utc::now().timestamp_nanos_opt().unwrap_or_default()
                    ),
                    pattern_type: signal.signal_type,
                    event_id: Some(market.event_id.clone()),
                    asset_id: trade.asset_id.clone(),
                    confidence: signal.confidence,
                    direction: signal.direction,
                    severity: signal.severity,
                    metadata: signal.metadata,
                    trade_id: signal.trade_id,
                    detected_at: signal.detected_at,
                })
                .await;
        }
    }

    /// §4.11 `processOrderBookUpdate`: record a liquidity snapshot; on a
    /// detected drop, run the liquidity-impact simulation against a
    /// synthetic trade representing the depth change.
    pub async fn process_order_book_update(self: &Arc<Self>, asset_id: &str) {
        let Some(book_handle) = self.books.get(asset_id) else {
            return;
        };
        let book = book_handle.read();
        let record = self.liquidity.record_snapshot(asset_id, &book);
        self.storage.record_orderbook_snapshot(record);

        let Some(change) = self.liquidity.calculate_liquidity_change(asset_id) else {
            return;
        };
        if !self.liquidity.detect_liquidity_drop(asset_id, LIQUIDITY_DROP_THRESHOLD) {
            return;
        }

        let depth_delta = change.current_total - change.prev_total;
        let side = if depth_delta < 0.0 { Side::Sell } else { Side::Buy };
        let trade_size = depth_delta.abs();

        let impact = OrderBookAnalyzer::calculate_liquidity_impact(trade_size, side, &book);
        if impact.impact_percent / 100.0 <= 0.02 {
            return;
        }

        let market = self.market_context(asset_id);
        self.detected_signals.fetch_add(1, Ordering::Relaxed);
        self.storage
            .record_detected_pattern(crate::models::DetectedPattern {
                id: format!("liquidity-change-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
                pattern_type: "liquidity-change".to_string(),
                event_id: Some(market.event_id.clone()),
                asset_id: asset_id.to_string(),
                confidence: (impact.impact_percent / 10.0).min(1.0),
                direction: Some(if side == Side::Sell { Direction::No } else { Direction::Yes }),
                severity: if impact.impact_percent > 5.0 {
                    crate::models::Severity::High
                } else {
                    crate::models::Severity::Medium
                },
                metadata: serde_json::json!({
                    "changePercent": change.change_percent,
                    "levelsConsumed": impact.levels_consumed,
                }),
                trade_id: None,
                detected_at: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_processor(storage: Arc<Storage>) -> Arc<StreamProcessor> {
        let config = Config::from_env();
        let rest = Arc::new(
            RestClient::new(config.polymarket.base_url.clone(), config.clob_rate_limits.clone()).unwrap(),
        );
        let (sub, _rx) = SubscriptionClient::spawn(config.polymarket.ws_url.clone(), config.realtime.clone());
        StreamProcessor::new(config, storage, rest, sub)
    }

    #[tokio::test]
    async fn process_trade_drops_unparseable_shape() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::load(dir.path()).await.unwrap());
        let processor = test_processor(storage);

        processor.process_trade(&serde_json::json!({"foo": "bar"})).await;
        assert_eq!(processor.counters().processed_trades, 0);
    }

    #[tokio::test]
    async fn process_trade_counts_valid_trade() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::load(dir.path()).await.unwrap());
        let processor = test_processor(storage);

        processor
            .process_trade(&serde_json::json!({
                "asset_id": "tok-1",
                "price": 0.5,
                "size": 10.0,
                "side": "BUY",
                "maker": "0xabc",
            }))
            .await;
        assert_eq!(processor.counters().processed_trades, 1);
    }

    #[test]
    fn consistent_hash_is_deterministic() {
        assert_eq!(consistent_hash("tok-1"), consistent_hash("tok-1"));
    }
}
