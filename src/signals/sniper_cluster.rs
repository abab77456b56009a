//! Sniper-cluster detector (§4.9, weight 0.16): bins recent trades into
//! fixed-length windows and looks for multiple distinct wallets piling into
//! the same side within a window. Connection confidence is delegated to
//! `wallet::FundingAnalyzer`, grounded on its funding-cluster scoring.

use super::{ProcessorContext, SignalProcessor};
use crate::models::{Direction, Severity, Side, SignalResult, Trade};
use chrono::Duration;
use serde_json::json;
use std::collections::HashSet;

pub struct SniperClusterProcessor {
    weight: f64,
    window_minutes: i64,
    min_wallets: usize,
}

impl SniperClusterProcessor {
    pub fn new(weight: f64, window_minutes: i64, min_wallets: usize) -> Self {
        Self { weight, window_minutes, min_wallets }
    }
}

impl Default for SniperClusterProcessor {
    fn default() -> Self {
        Self::new(0.16, 5, 3)
    }
}

struct Candidate {
    direction: Side,
    wallets: Vec<String>,
    total_volume: f64,
    confidence: f64,
}

fn bin_into_windows(trades: &[&Trade], window_minutes: i64) -> Vec<Vec<&Trade>> {
    let mut sorted: Vec<&Trade> = trades.to_vec();
    sorted.sort_by_key(|t| t.timestamp);

    let mut windows: Vec<Vec<&Trade>> = Vec::new();
    let mut bin_start = None;
    for trade in sorted {
        match bin_start {
            Some(start) if trade.timestamp - start <= Duration::minutes(window_minutes) => {
                windows.last_mut().unwrap().push(trade);
            }
            _ => {
                bin_start = Some(trade.timestamp);
                windows.push(vec![trade]);
            }
        }
    }
    windows
}

fn candidates_in_window(window: &[&Trade], min_wallets: usize) -> Vec<Candidate> {
    let mut out = Vec::new();
    for side in [Side::Buy, Side::Sell] {
        let mut wallets: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut total_volume = 0.0;
        for trade in window.iter().filter(|t| t.side == side) {
            let Some(addr) = trade.wallet_address() else {
                continue;
            };
            total_volume += trade.size;
            if seen.insert(addr.to_string()) {
                wallets.push(addr.to_string());
            }
        }
        if wallets.len() >= min_wallets {
            out.push(Candidate {
                direction: side,
                wallets,
                total_volume,
                confidence: 0.0,
            });
        }
    }
    out
}

impl SignalProcessor for SniperClusterProcessor {
    fn name(&self) -> &'static str {
        "sniper-cluster"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_batch(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        let market_trades: Vec<&Trade> = ctx
            .trade_history
            .iter()
            .filter(|t| t.asset_id == ctx.market.token_id)
            .collect();
        if market_trades.is_empty() {
            return Some(SignalResult::not_detected());
        }

        let windows = bin_into_windows(&market_trades, self.window_minutes);
        let mut best: Option<(Candidate, f64)> = None;

        for window in &windows {
            for mut candidate in candidates_in_window(window, self.min_wallets) {
                let connection_confidence = ctx
                    .funding_analyzer
                    .and_then(|analyzer| {
                        let seed = candidate.wallets.first()?;
                        let scores: Vec<f64> = candidate.wallets[1..]
                            .iter()
                            .map(|other| analyzer.connection_confidence(seed, other, 0, 0, false))
                            .collect();
                        if scores.is_empty() {
                            None
                        } else {
                            Some(scores.iter().sum::<f64>() / scores.len() as f64)
                        }
                    })
                    .unwrap_or(0.0);

                let size_confidence = (candidate.wallets.len() as f64 / 10.0).min(0.7);
                candidate.confidence = (size_confidence + 0.3 * connection_confidence).min(1.0);
                let score = candidate.wallets.len() as f64 * candidate.confidence;

                let is_better = best.as_ref().map(|(_, best_score)| score > *best_score).unwrap_or(true);
                if is_better {
                    best = Some((candidate, score));
                }
            }
        }

        let Some((candidate, _)) = best else {
            return Some(SignalResult::not_detected());
        };

        let severity = if candidate.wallets.len() >= 5 {
            Severity::High
        } else {
            Severity::Medium
        };
        let direction = match candidate.direction {
            Side::Buy => Direction::Yes,
            Side::Sell => Direction::No,
        };

        Some(SignalResult {
            detected: true,
            confidence: candidate.confidence,
            direction: Some(direction),
            severity,
            metadata: json!({
                "clusterSize": candidate.wallets.len(),
                "wallets": candidate.wallets,
                "totalVolume": candidate.total_volume,
                "direction": direction,
                "windowMs": self.window_minutes * 60_000,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketContext;
    use chrono::Utc;

    fn market() -> MarketContext {
        MarketContext {
            event_id: "evt-1".into(),
            market_id: "mkt-1".into(),
            token_id: "tok-1".into(),
            liquidity: 1000.0,
            end_date: None,
        }
    }

    fn trade(wallet: &str) -> Trade {
        Trade {
            id: format!("t-{wallet}"),
            asset_id: "tok-1".into(),
            price: 0.5,
            size: 10.0,
            side: Side::Buy,
            maker: Some(wallet.to_string()),
            taker: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn detects_cluster_of_three_distinct_wallets() {
        let market = market();
        let trades = vec![trade("0xa"), trade("0xb"), trade("0xc")];
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: None,
            orderbook: None,
            wallet_profile: None,
            trade_history: &trades,
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = SniperClusterProcessor::default().process(&ctx).unwrap();
        assert!(result.detected);
    }

    #[test]
    fn no_cluster_below_min_wallets() {
        let market = market();
        let trades = vec![trade("0xa"), trade("0xb")];
        let ctx = ProcessorContext {
            event_id: "evt-1",
            market: &market,
            trade: None,
            orderbook: None,
            wallet_profile: None,
            trade_history: &trades,
            funding_analyzer: None,
            now: Utc::now(),
        };
        let result = SniperClusterProcessor::default().process(&ctx).unwrap();
        assert!(!result.detected);
    }
}
