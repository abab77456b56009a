//! Wallet-accuracy detector (§4.9, weight 0.18). z-score against a 50%
//! baseline win rate, grounded on `wallet.rs`'s risk-scoring style of pure
//! statistical helpers.

use super::{ProcessorContext, SignalProcessor};
use crate::models::{Severity, SignalResult};
use crate::wallet::MIN_RESOLVED_POSITIONS;
use serde_json::json;

pub struct WalletAccuracyProcessor {
    weight: f64,
    min_win_rate: f64,
    min_resolved_positions: u64,
}

impl WalletAccuracyProcessor {
    pub fn new(weight: f64, min_win_rate: f64, min_resolved_positions: u64) -> Self {
        Self { weight, min_win_rate, min_resolved_positions }
    }
}

impl Default for WalletAccuracyProcessor {
    fn default() -> Self {
        Self::new(0.18, 0.7, MIN_RESOLVED_POSITIONS)
    }
}

impl SignalProcessor for WalletAccuracyProcessor {
    fn name(&self) -> &'static str {
        "wallet-accuracy"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_batch(&self) -> bool {
        false
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn process(&self, ctx: &ProcessorContext) -> Option<SignalResult> {
        let profile = ctx.wallet_profile?;
        if profile.win_rate <= self.min_win_rate || profile.resolved_positions < self.min_resolved_positions {
            return Some(SignalResult::not_detected());
        }

        let z = (profile.win_rate - 0.5) / (0.25 / profile.resolved_positions as f64).sqrt();
        let severity = if profile.win_rate > 0.85 || z > 3.0 {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(SignalResult {
            detected: true,
            confidence: (z / 3.0).min(1.0),
            direction: None,
            severity,
            metadata: json!({
                "winRate": profile.win_rate,
                "resolvedPositions": profile.resolved_positions,
                "zScore": z,
            }),
        })
    }
}
