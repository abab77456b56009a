//! In-memory storage (§4.1) with bounded collections and best-effort disk
//! persistence for detected patterns and whale trades.
//!
//! Grounded on `signals::storage::SignalStorage`'s `VecDeque` + `pop_front`
//! eviction idiom, generalized to every bounded collection the spec names.

use crate::models::{DetectedPattern, OrderbookSnapshotRecord, Signal, Trade, WalletProfile, WhaleTradeRecord};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::warn;

const TRADE_HISTORY_CAPACITY: usize = 100_000;
const DETECTED_PATTERNS_CAPACITY: usize = 100_000;
const WHALE_TRADES_CAPACITY: usize = 10_000;
const ORDERBOOK_SNAPSHOT_CAPACITY: usize = 100;
const SIGNALS_CAPACITY: usize = 100_000;

/// Bounded FIFO collection, generic over what's inside it.
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recent `limit` items, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&T> {
        self.items.iter().rev().take(limit).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

pub struct Storage {
    data_dir: PathBuf,
    wallet_profiles: RwLock<HashMap<String, WalletProfile>>,
    trade_history: RwLock<BoundedQueue<Trade>>,
    detected_patterns: RwLock<BoundedQueue<DetectedPattern>>,
    whale_trades: RwLock<BoundedQueue<WhaleTradeRecord>>,
    orderbook_snapshots: RwLock<HashMap<String, BoundedQueue<OrderbookSnapshotRecord>>>,
    signals: RwLock<HashMap<String, BoundedQueue<Signal>>>,
}

impl Storage {
    /// Loads persisted patterns/whale-trades from `data_dir`; a missing file
    /// is treated as an empty collection (§4.1 contract).
    pub async fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let patterns = load_json_array::<DetectedPattern>(&data_dir.join("detected-patterns.json")).await;
        let whales = load_json_array::<WhaleTradeRecord>(&data_dir.join("whale-trades.json")).await;

        let mut pattern_queue = BoundedQueue::new(DETECTED_PATTERNS_CAPACITY);
        for p in patterns {
            pattern_queue.push(p);
        }
        let mut whale_queue = BoundedQueue::new(WHALE_TRADES_CAPACITY);
        for w in whales {
            whale_queue.push(w);
        }

        Ok(Self {
            data_dir,
            wallet_profiles: RwLock::new(HashMap::new()),
            trade_history: RwLock::new(BoundedQueue::new(TRADE_HISTORY_CAPACITY)),
            detected_patterns: RwLock::new(pattern_queue),
            whale_trades: RwLock::new(whale_queue),
            orderbook_snapshots: RwLock::new(HashMap::new()),
            signals: RwLock::new(HashMap::new()),
        })
    }

    // --- wallet profiles ---

    pub fn get_wallet_profile(&self, address: &str) -> Option<WalletProfile> {
        self.wallet_profiles.read().get(&address.to_lowercase()).cloned()
    }

    pub fn upsert_wallet_profile(&self, profile: WalletProfile) {
        self.wallet_profiles
            .write()
            .insert(profile.address.to_lowercase(), profile);
    }

    // --- trade history ---

    pub fn record_trade(&self, trade: Trade) {
        self.trade_history.write().push(trade);
    }

    pub fn trade_history_len(&self) -> usize {
        self.trade_history.read().len()
    }

    pub fn trades_for_asset(&self, asset_id: &str, limit: usize) -> Vec<Trade> {
        self.trade_history
            .read()
            .iter()
            .rev()
            .filter(|t| t.asset_id == asset_id)
            .take(limit)
            .cloned()
            .collect()
    }

    // --- detected patterns (disk-mirrored) ---

    pub async fn record_detected_pattern(&self, pattern: DetectedPattern) {
        self.detected_patterns.write().push(pattern);
        self.flush_patterns().await;
    }

    pub fn detected_patterns_len(&self) -> usize {
        self.detected_patterns.read().len()
    }

    async fn flush_patterns(&self) {
        let snapshot: Vec<DetectedPattern> = self
            .detected_patterns
            .read()
            .iter()
            .cloned()
            .collect();
        if let Err(e) = write_json_array(&self.data_dir.join("detected-patterns.json"), &snapshot).await {
            warn!(error = %e, "failed to persist detected-patterns.json");
        }
    }

    // --- whale trades (disk-mirrored) ---

    pub async fn record_whale_trade(&self, record: WhaleTradeRecord) {
        self.whale_trades.write().push(record);
        self.flush_whale_trades().await;
    }

    pub fn whale_trades_len(&self) -> usize {
        self.whale_trades.read().len()
    }

    async fn flush_whale_trades(&self) {
        let snapshot: Vec<WhaleTradeRecord> = self.whale_trades.read().iter().cloned().collect();
        if let Err(e) = write_json_array(&self.data_dir.join("whale-trades.json"), &snapshot).await {
            warn!(error = %e, "failed to persist whale-trades.json");
        }
    }

    // --- orderbook snapshots (liquidity tracker ring buffer, §4.6) ---

    pub fn record_orderbook_snapshot(&self, record: OrderbookSnapshotRecord) {
        let mut snapshots = self.orderbook_snapshots.write();
        snapshots
            .entry(record.asset_id.clone())
            .or_insert_with(|| BoundedQueue::new(ORDERBOOK_SNAPSHOT_CAPACITY))
            .push(record);
    }

    pub fn orderbook_snapshots(&self, asset_id: &str) -> Vec<OrderbookSnapshotRecord> {
        self.orderbook_snapshots
            .read()
            .get(asset_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- signals (§4.10 registry persistence) ---

    pub fn record_signal(&self, signal: Signal) {
        let mut signals = self.signals.write();
        signals
            .entry(signal.event_id.clone())
            .or_insert_with(|| BoundedQueue::new(SIGNALS_CAPACITY))
            .push(signal);
    }

    pub fn signals_for_event(&self, event_id: &str) -> Vec<Signal> {
        self.signals
            .read()
            .get(event_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

async fn load_json_array<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Vec<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Whole-file serialize-and-replace, via a temp file + rename (§5 disk
/// persistence policy: concurrent writers serialize on the same path — the
/// caller holds the collection's `RwLock` write guard while snapshotting, so
/// two flushes never interleave their temp-file writes).
async fn write_json_array<T: serde::Serialize>(path: &PathBuf, items: &[T]) -> Result<()> {
    let body = serde_json::to_vec_pretty(items).context("serializing collection")?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body)
        .await
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_evicts_oldest() {
        let mut q: BoundedQueue<i32> = BoundedQueue::new(3);
        q.push(1);
        q.push(2);
        q.push(3);
        q.push(4);
        assert_eq!(q.len(), 3);
        let recent: Vec<i32> = q.recent(3).into_iter().copied().collect();
        assert_eq!(recent, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn storage_persists_and_reloads_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::load(dir.path()).await.unwrap();

        let pattern = DetectedPattern {
            id: "p1".into(),
            pattern_type: "fresh-wallet".into(),
            event_id: Some("evt1".into()),
            asset_id: "tok-1".into(),
            confidence: 0.8,
            direction: None,
            severity: crate::models::Severity::High,
            metadata: serde_json::json!({}),
            trade_id: None,
            detected_at: chrono::Utc::now(),
        };
        storage.record_detected_pattern(pattern).await;
        assert_eq!(storage.detected_patterns_len(), 1);

        let reloaded = Storage::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.detected_patterns_len(), 1);
    }

    #[test]
    fn trade_history_caps_at_capacity() {
        let mut q: BoundedQueue<i32> = BoundedQueue::new(TRADE_HISTORY_CAPACITY);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 5);
    }
}
