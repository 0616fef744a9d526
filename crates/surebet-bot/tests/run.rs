//! End-to-end runs against the paper venue.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::path::Path;
use surebet_bot::{AppConfig, Application};
use surebet_core::now_ns;
use surebet_persistence::{AuditKind, AuditStore, JsonLinesStore};

fn config(dir: &Path, fill_ratio: Decimal, demo_mode: bool) -> AppConfig {
    let content = format!(
        r#"
[placer]
max_stake = "1000"
send_receive_max_delay_ms = 60000
demo_mode = {demo_mode}

[persistence]
dir = "{dir}"
buffer_size = 1

[paper]
fill_ratio = "{fill_ratio}"

[paper.account]
username = "paper"
takerFee = "0.0002"
makerFee = "0"

[[paper.markets]]
name = "BTC/USDT"
baseCurrency = "BTC"
quoteCurrency = "USDT"
priceIncrement = "0.01"
sizeIncrement = "0.01"
minProvideSize = "0.01"

[[paper.balances]]
coin = "BTC"
free = "50"
total = "50"
usdValue = "5000"

[[paper.balances]]
coin = "USDT"
free = "10000"
total = "10000"
usdValue = "10000"
"#,
        dir = dir.display(),
    );
    AppConfig::from_toml(&content).unwrap()
}

/// Buy-side opportunity: trade ask 100.00 below reference bid 100.50.
fn signal_line(id: i64) -> String {
    json!({
        "id": id,
        "trade": {
            "symbol": "BTC/USDT",
            "bid_price": "99.99", "bid_qty": "5",
            "ask_price": "100.00", "ask_qty": "5"
        },
        "reference": {
            "symbol": "BTCUSDT",
            "bid_price": "100.50", "bid_qty": "3",
            "ask_price": "100.60", "ask_qty": "3"
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_partial_fill_is_placed_and_healed() {
    let dir = tempfile::tempdir().unwrap();
    let id = now_ns();
    let stale_id = id - 120_000_000_000;
    let input = format!(
        "{}\nnot a signal\n{}\n",
        signal_line(id),
        signal_line(stale_id)
    );

    let mut app = Application::new(config(dir.path(), dec!(0.5), false)).unwrap();
    let summary = app.run(input.as_bytes()).await.unwrap();

    assert_eq!(summary.signals, 2);
    assert_eq!(summary.placed, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.malformed, 1);
    // hedge fill + hedge close; the heal child rests
    assert_eq!(summary.venue_events, 2);
    assert_eq!(summary.unresolved_heals, 0);

    let mut store = JsonLinesStore::new(dir.path(), 1).unwrap();
    let decision = store.find_by_id(AuditKind::Surebet, id).unwrap().unwrap();
    let order_id = decision.order_id.unwrap();
    let price: Decimal = decision.payload["place"]["price"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(price, dec!(100.20));

    let heal = store.find_by_id(AuditKind::Heal, id).unwrap().unwrap();
    assert_eq!(heal.order_id, Some(order_id));
    assert_eq!(heal.payload["orders"].as_array().unwrap().len(), 1);

    assert!(store.find_by_id(AuditKind::Order, order_id).unwrap().is_some());
    assert!(store.find_by_id(AuditKind::Surebet, stale_id).unwrap().is_none());

    let account = store.find_by_id(AuditKind::Account, 0).unwrap().unwrap();
    assert_eq!(account.payload["username"], "paper");
    assert!(store.find_by_id(AuditKind::Balances, 0).unwrap().is_some());
}

#[tokio::test]
async fn test_unfilled_hedge_leaves_no_live_records() {
    let dir = tempfile::tempdir().unwrap();
    let id = now_ns();

    let mut app = Application::new(config(dir.path(), dec!(0), false)).unwrap();
    let summary = app
        .run(format!("{}\n", signal_line(id)).as_bytes())
        .await
        .unwrap();
    assert_eq!(summary.placed, 1);

    let mut store = JsonLinesStore::new(dir.path(), 1).unwrap();
    assert!(store.find_by_id(AuditKind::Surebet, id).unwrap().is_none());
    assert!(store.find_by_id(AuditKind::Heal, id).unwrap().is_none());
}

#[tokio::test]
async fn test_demo_mode_places_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let id = now_ns();

    let mut app = Application::new(config(dir.path(), dec!(1), true)).unwrap();
    let summary = app
        .run(format!("{}\n", signal_line(id)).as_bytes())
        .await
        .unwrap();

    assert_eq!(summary.demo, 1);
    assert_eq!(summary.placed, 0);
    assert_eq!(summary.venue_events, 0);

    let mut store = JsonLinesStore::new(dir.path(), 1).unwrap();
    assert!(store.find_by_id(AuditKind::Surebet, id).unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_token_stops_open_feed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), dec!(1), false);
    cfg.persistence.enabled = false;

    let mut app = Application::new(cfg).unwrap();
    let token = app.shutdown_token();
    // writer half kept alive: the feed never reaches end of input
    let (_writer, reader) = tokio::io::duplex(64);
    let run = tokio::spawn(async move { app.run(reader).await });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    token.cancel();

    let summary = tokio::time::timeout(std::time::Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.signals, 0);
}

#[test]
fn test_shipped_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
    let config = AppConfig::from_file(path).unwrap();
    assert!(config.placer.demo_mode);
    assert_eq!(config.paper.markets.len(), 2);
    assert_eq!(config.dispatcher.channel_capacity, 200);
}
