//! Resilient subscription client (§4.3).
//!
//! Grounded on `scrapers::polymarket_book_store::SubscriptionManager`: a
//! background task owns the connection, driven by an mpsc command channel,
//! publishing a typed event stream back to the caller. Reconnect/backoff and
//! the `tokio::select!` read/ping/command loop follow `run_ws_loop` and
//! `connect_and_stream` directly; this module generalizes the teacher's
//! single implicit "universe" subscription into the spec's explicit
//! per-(asset, kind) subscription set and connection state machine.

use crate::config::RealtimeConfig;
use crate::error::EngineError;
use crate::models::value_to_f64;
use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Book,
    PriceChange,
    LastTradePrice,
    TickSizeChange,
}

impl SubscriptionKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            SubscriptionKind::Book => "book",
            SubscriptionKind::PriceChange => "price_change",
            SubscriptionKind::LastTradePrice => "last_trade_price",
            SubscriptionKind::TickSizeChange => "tick_size_change",
        }
    }

    fn from_wire_name(name: &str) -> Option<SubscriptionKind> {
        match name {
            "book" => Some(SubscriptionKind::Book),
            "price_change" => Some(SubscriptionKind::PriceChange),
            "last_trade_price" => Some(SubscriptionKind::LastTradePrice),
            "tick_size_change" => Some(SubscriptionKind::TickSizeChange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Connected,
    Disconnected { reason: String },
    Book {
        asset_id: String,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        timestamp: chrono::DateTime<chrono::Utc>,
        hash: Option<String>,
    },
    PriceChange {
        asset_id: String,
        price: f64,
        size: f64,
        side: crate::models::Side,
    },
    LastTradePrice(Value),
    TickSizeChange(Value),
    Message { kind: String, payload: Value },
    ProtocolError(String),
    TerminalError(String),
}

enum Command {
    Connect,
    Disconnect,
    Subscribe(String, Vec<SubscriptionKind>),
    Unsubscribe(String),
    Shutdown,
}

/// Public, non-blocking handle. The actual connection lives in a spawned
/// task owned by `run`.
pub struct SubscriptionClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ArcSwap<ConnectionState>>,
}

impl SubscriptionClient {
    /// Spawns the background task and returns a handle plus the event
    /// receiver the caller should drain.
    pub fn spawn(ws_url: String, config: RealtimeConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<InboundEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ArcSwap::from_pointee(ConnectionState::Disconnected));

        let client = Arc::new(Self {
            cmd_tx,
            state: state.clone(),
        });

        tokio::spawn(run(ws_url, config, cmd_rx, event_tx, state));

        (client, event_rx)
    }

    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    pub fn subscribe(&self, asset_id: &str, kinds: Vec<SubscriptionKind>) -> Result<(), EngineError> {
        if asset_id.is_empty() {
            return Err(EngineError::Validation("subscribe: assetId must not be empty".into()));
        }
        let _ = self.cmd_tx.send(Command::Subscribe(asset_id.to_string(), kinds));
        Ok(())
    }

    pub fn unsubscribe(&self, asset_id: &str) -> Result<(), EngineError> {
        if asset_id.is_empty() {
            return Err(EngineError::Validation("unsubscribe: assetId must not be empty".into()));
        }
        let _ = self.cmd_tx.send(Command::Unsubscribe(asset_id.to_string()));
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        **self.state.load()
    }
}

async fn run(
    ws_url: String,
    config: RealtimeConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    state: Arc<ArcSwap<ConnectionState>>,
) {
    let mut subscriptions: HashMap<String, HashSet<SubscriptionKind>> = HashMap::new();
    let mut intentional_disconnect = false;
    let mut reconnect_attempt: u32 = 0;
    let mut connected = false;

    loop {
        if !connected {
            // Drain pending commands without blocking the reconnect loop.
            while let Ok(cmd) = cmd_rx.try_recv() {
                if apply_command_pre_connect(cmd, &mut subscriptions, &mut intentional_disconnect) {
                    let _ = event_tx.send(InboundEvent::TerminalError("shutdown requested".into()));
                    return;
                }
            }

            if intentional_disconnect {
                state.store(Arc::new(ConnectionState::Disconnected));
                match cmd_rx.recv().await {
                    Some(Command::Connect) => {
                        intentional_disconnect = false;
                        reconnect_attempt = 0;
                    }
                    Some(Command::Shutdown) | None => return,
                    Some(other) => {
                        apply_command_pre_connect(other, &mut subscriptions, &mut intentional_disconnect);
                        continue;
                    }
                }
            }

            if reconnect_attempt >= config.reconnect_attempts {
                let _ = event_tx.send(InboundEvent::TerminalError(
                    "reconnect attempts exhausted".into(),
                ));
                return;
            }

            state.store(Arc::new(ConnectionState::Connecting));
            match connect_and_stream(
                &ws_url,
                &config,
                &mut cmd_rx,
                &event_tx,
                &state,
                &mut subscriptions,
                &mut intentional_disconnect,
            )
            .await
            {
                Ok(shutdown_requested) => {
                    connected = false;
                    if shutdown_requested {
                        return;
                    }
                    reconnect_attempt = 0;
                }
                Err(reason) => {
                    connected = false;
                    state.store(Arc::new(ConnectionState::Disconnected));
                    let _ = event_tx.send(InboundEvent::Disconnected { reason: reason.clone() });
                    warn!(reason = %reason, attempt = reconnect_attempt, "subscription client disconnected");

                    if intentional_disconnect {
                        continue;
                    }

                    let base = config.reconnect_base_delay();
                    let jitter_ms = rand::thread_rng().gen_range(0..1000);
                    let delay = std::cmp::min(
                        base * 2u32.saturating_pow(reconnect_attempt) + Duration::from_millis(jitter_ms),
                        base * 10,
                    );
                    reconnect_attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Applies a command while not connected. Returns true if shutdown was
/// requested.
fn apply_command_pre_connect(
    cmd: Command,
    subscriptions: &mut HashMap<String, HashSet<SubscriptionKind>>,
    intentional_disconnect: &mut bool,
) -> bool {
    match cmd {
        Command::Connect => {
            *intentional_disconnect = false;
        }
        Command::Disconnect => {
            *intentional_disconnect = true;
        }
        Command::Subscribe(asset_id, kinds) => {
            subscriptions
                .entry(asset_id)
                .or_default()
                .extend(kinds);
        }
        Command::Unsubscribe(asset_id) => {
            subscriptions.remove(&asset_id);
        }
        Command::Shutdown => return true,
    }
    false
}

/// Connects, resubscribes, and streams until the socket closes or a terminal
/// command arrives. Returns `Ok(shutdown_requested)` or `Err(reason)`.
async fn connect_and_stream(
    ws_url: &str,
    config: &RealtimeConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<InboundEvent>,
    state: &Arc<ArcSwap<ConnectionState>>,
    subscriptions: &mut HashMap<String, HashSet<SubscriptionKind>>,
    intentional_disconnect: &mut bool,
) -> Result<bool, String> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws_stream.split();

    state.store(Arc::new(ConnectionState::Connected));
    let _ = event_tx.send(InboundEvent::Connected);
    info!(url = ws_url, "subscription client connected");

    for (asset_id, kinds) in subscriptions.iter() {
        for kind in kinds {
            let frame = subscribe_frame(kind.wire_name(), "subscribe", asset_id);
            if write.send(Message::Text(frame.to_string())).await.is_err() {
                return Err("failed to resend subscription".into());
            }
        }
    }

    let mut heartbeat = interval(config.heartbeat_interval());

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if write.send(Message::Text(json!({"type": "ping"}).to_string())).await.is_err() {
                    return Err("ping failed".into());
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => {
                        *intentional_disconnect = true;
                        let _ = write.close().await;
                        return Ok(false);
                    }
                    Some(Command::Subscribe(asset_id, kinds)) => {
                        let entry = subscriptions.entry(asset_id.clone()).or_default();
                        let new_kinds: Vec<SubscriptionKind> = kinds.into_iter().filter(|k| !entry.contains(k)).collect();
                        entry.extend(new_kinds.iter().copied());
                        for kind in &new_kinds {
                            let frame = subscribe_frame(kind.wire_name(), "subscribe", &asset_id);
                            if write.send(Message::Text(frame.to_string())).await.is_err() {
                                return Err("subscribe send failed".into());
                            }
                        }
                    }
                    Some(Command::Unsubscribe(asset_id)) => {
                        if let Some(kinds) = subscriptions.remove(&asset_id) {
                            for kind in kinds {
                                let frame = subscribe_frame(kind.wire_name(), "unsubscribe", &asset_id);
                                if write.send(Message::Text(frame.to_string())).await.is_err() {
                                    return Err("unsubscribe send failed".into());
                                }
                            }
                        }
                    }
                    Some(Command::Shutdown) => {
                        let _ = write.close().await;
                        return Ok(true);
                    }
                    None => return Ok(true),
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch_inbound(&text, event_tx),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        return Err(frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "closed".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.to_string()),
                    None => return Err("stream ended".into()),
                }
            }
        }
    }
}

fn subscribe_frame(kind: &str, action: &str, asset_id: &str) -> Value {
    json!({ "type": kind, "action": action, "assets_ids": [asset_id] })
}

/// Classifies and emits one inbound frame (§4.3 inbound dispatch / §6 wire
/// shapes). Non-JSON-shaped payloads (feed control strings) are silently
/// dropped, per §7 `FeedNoiseError`.
fn dispatch_inbound(text: &str, event_tx: &mpsc::UnboundedSender<InboundEvent>) {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("pong") {
        return;
    }
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        debug!(payload = trimmed, "dropping non-JSON feed noise");
        return;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            let _ = event_tx.send(InboundEvent::ProtocolError(e.to_string()));
            return;
        }
    };

    let kind_source = match &value {
        Value::Array(items) => items.first().unwrap_or(&value),
        other => other,
    };
    let kind = kind_source
        .get("type")
        .or_else(|| kind_source.get("event_type"))
        .and_then(Value::as_str)
        .unwrap_or("other")
        .to_string();

    match kind.as_str() {
        "book" => match parse_book_event(&value) {
            Some(ev) => {
                let _ = event_tx.send(ev);
            }
            None => {
                let _ = event_tx.send(InboundEvent::ProtocolError("malformed book event".into()));
            }
        },
        "price_change" => {
            for entry in as_entries(&value) {
                match parse_price_change(&entry) {
                    Some(ev) => {
                        let _ = event_tx.send(ev);
                    }
                    None => {
                        let _ = event_tx.send(InboundEvent::ProtocolError("malformed price_change".into()));
                    }
                }
            }
        }
        "last_trade_price" => {
            let _ = event_tx.send(InboundEvent::LastTradePrice(value));
        }
        "tick_size_change" => {
            let _ = event_tx.send(InboundEvent::TickSizeChange(value));
        }
        "pong" => {}
        other => {
            let _ = event_tx.send(InboundEvent::Message {
                kind: other.to_string(),
                payload: value,
            });
        }
    }
}

fn as_entries(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn parse_book_event(value: &Value) -> Option<InboundEvent> {
    let asset_id = value
        .get("asset_id")
        .or_else(|| value.get("assetId"))
        .or_else(|| value.get("market"))
        .or_else(|| value.get("token_id"))
        .or_else(|| value.get("tokenId"))
        .and_then(Value::as_str)?
        .to_string();

    let bids = parse_levels(value.get("bids")?)?;
    let asks = parse_levels(value.get("asks")?)?;

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    let hash = value.get("hash").and_then(Value::as_str).map(|s| s.to_string());

    Some(InboundEvent::Book {
        asset_id,
        bids,
        asks,
        timestamp,
        hash,
    })
}

fn parse_levels(levels: &Value) -> Option<Vec<(f64, f64)>> {
    let arr = levels.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let (price, size) = match level {
            Value::Object(map) => (
                map.get("price").and_then(value_to_f64)?,
                map.get("size").and_then(value_to_f64)?,
            ),
            Value::Array(tuple) if tuple.len() == 2 => (
                value_to_f64(&tuple[0])?,
                value_to_f64(&tuple[1])?,
            ),
            _ => return None,
        };
        out.push((price, size));
    }
    Some(out)
}

fn parse_price_change(value: &Value) -> Option<InboundEvent> {
    let asset_id = value
        .get("asset_id")
        .or_else(|| value.get("assetId"))
        .or_else(|| value.get("market"))
        .and_then(Value::as_str)?
        .to_string();
    let price = value.get("price").and_then(value_to_f64)?;
    let size = value.get("size").and_then(value_to_f64)?;
    let side = value
        .get("side")
        .and_then(Value::as_str)
        .and_then(crate::models::Side::from_str_loose)?;
    Some(InboundEvent::PriceChange {
        asset_id,
        price,
        size,
        side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn subscription_kind_wire_names() {
        assert_eq!(SubscriptionKind::Book.wire_name(), "book");
        assert_eq!(SubscriptionKind::from_wire_name("price_change"), Some(SubscriptionKind::PriceChange));
        assert_eq!(SubscriptionKind::from_wire_name("bogus"), None);
    }

    #[test]
    fn subscribe_frame_matches_fixed_wire_shape() {
        let frame = subscribe_frame("book", "subscribe", "tok-1");
        assert_eq!(frame["type"], "book");
        assert_eq!(frame["action"], "subscribe");
        assert_eq!(frame["assets_ids"][0], "tok-1");
    }

    #[test]
    fn dispatch_drops_non_json_noise() {
        let (tx, mut rx) = unbounded_channel();
        dispatch_inbound("INVALID OPERATION", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_ignores_pong_case_insensitively() {
        let (tx, mut rx) = unbounded_channel();
        dispatch_inbound("PONG", &tx);
        dispatch_inbound("pong", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_parses_book_event_with_string_and_numeric_levels() {
        let (tx, mut rx) = unbounded_channel();
        let payload = json!({
            "event_type": "book",
            "asset_id": "tok-1",
            "bids": [{"price": "0.60", "size": 1000}],
            "asks": [[0.61, 500]],
            "hash": "abc123",
        })
        .to_string();
        dispatch_inbound(&payload, &tx);
        match rx.try_recv().unwrap() {
            InboundEvent::Book { asset_id, bids, asks, hash, .. } => {
                assert_eq!(asset_id, "tok-1");
                assert_eq!(bids, vec![(0.60, 1000.0)]);
                assert_eq!(asks, vec![(0.61, 500.0)]);
                assert_eq!(hash.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn dispatch_parses_price_change_array() {
        let (tx, mut rx) = unbounded_channel();
        let payload = json!([
            {"event_type": "price_change", "asset_id": "tok-1", "price": "0.5", "size": "10", "side": "BUY"},
            {"event_type": "price_change", "asset_id": "tok-1", "price": "0.4", "size": "5", "side": "SELL"},
        ])
        .to_string();
        dispatch_inbound(&payload, &tx);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(first, InboundEvent::PriceChange { .. }));
        assert!(matches!(second, InboundEvent::PriceChange { .. }));
    }

    #[test]
    fn dispatch_reports_protocol_error_on_malformed_json_shape() {
        let (tx, mut rx) = unbounded_channel();
        dispatch_inbound("{not valid json", &tx);
        assert!(matches!(rx.try_recv().unwrap(), InboundEvent::ProtocolError(_)));
    }

    #[test]
    fn unknown_kind_is_reemitted_as_generic_message() {
        let (tx, mut rx) = unbounded_channel();
        let payload = json!({"type": "future_kind", "foo": "bar"}).to_string();
        dispatch_inbound(&payload, &tx);
        match rx.try_recv().unwrap() {
            InboundEvent::Message { kind, .. } => assert_eq!(kind, "future_kind"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
