//! Signal processors (§4.9) and registry (§4.10).
//!
//! The shared trait and dynamic-dispatch registry are grounded on
//! `signals/detector.rs::SignalDetector::detect_*`'s one-fn-per-detection-kind
//! layout and on `signals/correlator.rs::SignalCorrelator::analyze_correlations`'s
//! catch-log-continue dispatch shape.

mod batch;
mod fresh_wallet;
mod liquidity_impact;
mod sniper_cluster;
mod timing_pattern;
mod wallet_accuracy;

pub use batch::{HighLiquidityProcessor, ProbabilityExtremeProcessor, VolumeSpikeProcessor};
pub use fresh_wallet::FreshWalletProcessor;
pub use liquidity_impact::LiquidityImpactProcessor;
pub use sniper_cluster::SniperClusterProcessor;
pub use timing_pattern::TimingPatternProcessor;
pub use wallet_accuracy::WalletAccuracyProcessor;

use crate::models::{MarketContext, Signal, SignalResult, Trade, WalletProfile};
use crate::orderbook::OrderBook;
use crate::storage::Storage;
use crate::wallet::FundingAnalyzer;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Everything a processor might need to evaluate one event/trade. Fields a
/// given processor doesn't use are simply `None`/empty.
pub struct ProcessorContext<'a> {
    pub event_id: &'a str,
    pub market: &'a MarketContext,
    pub trade: Option<&'a Trade>,
    pub orderbook: Option<&'a OrderBook>,
    pub wallet_profile: Option<&'a WalletProfile>,
    pub trade_history: &'a [Trade],
    pub funding_analyzer: Option<&'a FundingAnalyzer>,
    pub now: DateTime<Utc>,
}

pub trait SignalProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f64;
    fn is_batch(&self) -> bool;
    fn is_realtime(&self) -> bool;
    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult>;
}

#[derive(Debug, Clone)]
pub struct SignalsSummary {
    pub count: usize,
    pub signals: Vec<Signal>,
    pub total_adjustment: f64,
}

/// §4.10. Owns the processor list and dispatches in batch/real-time modes.
pub struct SignalRegistry {
    processors: Vec<Box<dyn SignalProcessor>>,
    storage: Arc<Storage>,
}

impl SignalRegistry {
    pub fn new(storage: Arc<Storage>, config: &crate::config::SignalsConfig) -> Self {
        Self {
            processors: default_processors(config),
            storage,
        }
    }

    fn to_signal(event_id: &str, ctx: &ProcessorContext, proc: &dyn SignalProcessor, result: SignalResult) -> Signal {
        let adjustment = result.adjustment(proc.weight());
        Signal {
            event_id: event_id.to_string(),
            signal_type: proc.name().to_string(),
            severity: result.severity,
            confidence: result.confidence,
            direction: result.direction,
            weight: proc.weight(),
            adjustment,
            metadata: result.metadata,
            trade_id: ctx.trade.map(|t| t.id.clone()),
            detected_at: ctx.now,
        }
    }

    /// §4.10 `processEvent`: batch-compatible processors only.
    pub fn process_event(&self, event_id: &str, market: &MarketContext, trade_history: &[Trade]) -> Vec<Signal> {
        let ctx = ProcessorContext {
            event_id,
            market,
            trade: None,
            orderbook: None,
            wallet_profile: None,
            trade_history,
            funding_analyzer: None,
            now: Utc::now(),
        };

        let mut signals = Vec::new();
        for proc in self.processors.iter().filter(|p| p.is_batch()) {
            match proc.process(&ctx) {
                Some(result) if result.detected => {
                    let signal = Self::to_signal(event_id, &ctx, proc.as_ref(), result);
                    self.storage.record_signal(signal.clone());
                    signals.push(signal);
                }
                Some(_) | None => {}
            }
        }
        signals
    }

    /// §4.10 `processRealTimeTrade`: trade processors get full context,
    /// market-only batch processors run alongside; batch-only ones are
    /// skipped. Per-processor failures are logged and don't halt dispatch.
    pub fn process_real_time_trade(
        &self,
        event_id: &str,
        market: &MarketContext,
        trade: &Trade,
        orderbook: Option<&OrderBook>,
        wallet_profile: Option<&WalletProfile>,
        trade_history: &[Trade],
        funding_analyzer: Option<&FundingAnalyzer>,
    ) -> Vec<Signal> {
        let ctx = ProcessorContext {
            event_id,
            market,
            trade: Some(trade),
            orderbook,
            wallet_profile,
            trade_history,
            funding_analyzer,
            now: trade.timestamp,
        };

        let mut signals = Vec::new();
        for proc in self.processors.iter().filter(|p| p.is_realtime()) {
            match proc.process(&ctx) {
                Some(result) if result.detected => {
                    let signal = Self::to_signal(event_id, &ctx, proc.as_ref(), result);
                    self.storage.record_signal(signal.clone());
                    signals.push(signal);
                }
                Some(_) | None => {}
            }
        }
        signals
    }

    pub fn get_signals_summary(&self, event_id: &str) -> SignalsSummary {
        let signals = self.storage.signals_for_event(event_id);
        let total_adjustment = signals.iter().map(|s| s.adjustment).sum();
        SignalsSummary {
            count: signals.len(),
            signals,
            total_adjustment,
        }
    }
}

fn default_processors(config: &crate::config::SignalsConfig) -> Vec<Box<dyn SignalProcessor>> {
    vec![
        Box::new(FreshWalletProcessor::new(
            config.fresh_wallet.weight,
            config.fresh_wallet.min_trade_size,
        )),
        Box::new(LiquidityImpactProcessor::new(
            config.liquidity_impact.weight,
            config.liquidity_impact.threshold,
        )),
        Box::new(WalletAccuracyProcessor::new(
            config.wallet_accuracy.weight,
            config.wallet_accuracy.min_win_rate,
            config.wallet_accuracy.min_resolved_positions,
        )),
        Box::new(TimingPatternProcessor::new(
            config.timing_pattern.weight,
            config.timing_pattern.window_hours,
            config.timing_pattern.concentration_threshold,
        )),
        Box::new(SniperClusterProcessor::new(
            config.sniper_cluster.weight,
            config.sniper_cluster.window_minutes,
            config.sniper_cluster.min_wallets,
        )),
        Box::new(VolumeSpikeProcessor::default()),
        Box::new(ProbabilityExtremeProcessor::default()),
        Box::new(HighLiquidityProcessor::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Side};

    fn sample_market() -> MarketContext {
        MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 10_000.0,
            end_date: None,
        }
    }

    fn sample_trade(size: f64, side: Side) -> Trade {
        Trade {
            id: "t-1".into(),
            asset_id: "tok-1".into(),
            price: 0.5,
            size,
            side,
            maker: Some("0xfresh".into()),
            taker: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn registry_dispatches_realtime_fresh_wallet_signal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::load(dir.path()).await.unwrap());
        let registry = SignalRegistry::new(storage, &crate::config::Config::from_env().signals);

        let market = sample_market();
        let trade = sample_trade(500.0, Side::Buy);
        let mut profile = WalletProfile::new("0xfresh".into(), Utc::now());
        profile.total_trades = 1;

        let signals =
            registry.process_real_time_trade("evt-1", &market, &trade, None, Some(&profile), &[], None);

        assert!(signals.iter().any(|s| s.signal_type == "fresh-wallet"));
        let fresh = signals.iter().find(|s| s.signal_type == "fresh-wallet").unwrap();
        assert_eq!(fresh.direction, Some(Direction::Yes));
    }

    #[tokio::test]
    async fn signals_summary_sums_adjustments() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::load(dir.path()).await.unwrap());
        let registry = SignalRegistry::new(storage, &crate::config::Config::from_env().signals);

        let market = sample_market();
        let trade = sample_trade(500.0, Side::Buy);
        let mut profile = WalletProfile::new("0xfresh".into(), Utc::now());
        profile.total_trades = 1;
        registry.process_real_time_trade("evt-1", &market, &trade, None, Some(&profile), &[], None);

        let summary = registry.get_signals_summary("evt-1");
        assert_eq!(summary.count, summary.signals.len());
        assert!(summary.total_adjustment.is_finite());
    }
}
