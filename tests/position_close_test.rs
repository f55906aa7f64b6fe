//! Position-close detection tests: sell executions realizing P&L against
//! filled buys, zero-balance closes, and the guarantees that a close never
//! lands twice and a sell never closes two positions.

use ledgersync::db::{init_db, Repository, TradeFilter};
use ledgersync::domain::{
    ExchangeExecution, ExchangeOrderStatus, Side, Symbol, TimeMs, TradeRecord, TradeStatus, UserId,
};
use ledgersync::gateway::MockGateway;
use ledgersync::orchestration::{PassMode, Reconciler};
use ledgersync::Config;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn test_config(db_path: &str) -> Config {
    let mut env_map = HashMap::new();
    env_map.insert("DATABASE_PATH".to_string(), db_path.to_string());
    env_map.insert(
        "BYBIT_API_URL".to_string(),
        "http://localhost:1".to_string(),
    );
    env_map.insert("BYBIT_API_KEY".to_string(), "key".to_string());
    env_map.insert("BYBIT_API_SECRET".to_string(), "secret".to_string());
    env_map.insert("ACCOUNT_ID".to_string(), "acct-1".to_string());
    Config::from_env_map(env_map).unwrap()
}

async fn setup(mock: MockGateway) -> (Reconciler, Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let config = test_config(&db_path);
    let reconciler = Reconciler::new(Arc::new(mock), repo.clone(), config);
    (reconciler, repo, temp_dir)
}

fn user() -> UserId {
    UserId::new("acct-1")
}

fn recent(offset_ms: i64) -> TimeMs {
    TimeMs::now().saturating_sub_ms(offset_ms)
}

fn filled_buy(symbol: &str, order_id: &str, qty: &str, fill_price: &str) -> TradeRecord {
    let mut trade = TradeRecord::new(
        user(),
        Symbol::new(symbol),
        Side::Buy,
        dec(qty),
        dec(fill_price),
        Some(order_id.to_string()),
        TradeStatus::Filled,
        recent(600_000),
    );
    trade.fill_price = Some(dec(fill_price));
    trade
}

fn sell_execution(symbol: &str, order_id: &str, qty: &str, price: &str) -> ExchangeExecution {
    ExchangeExecution {
        symbol: Symbol::new(symbol),
        side: Side::Sell,
        external_order_id: order_id.to_string(),
        external_exec_id: Some(format!("exec-{}", order_id)),
        quantity: dec(qty),
        price: dec(price),
        time: recent(30_000),
        status: ExchangeOrderStatus::Filled,
    }
}

#[tokio::test]
async fn test_sell_execution_closes_buy_with_profit() {
    let buy = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "0.5", "50040"))
        .with_balance("BTC", dec("0.5"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.sell_closes, 1);

    let closed = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(closed.status, TradeStatus::Closed);
    // (50040 - 50000) * 0.5
    assert_eq!(closed.realized_pnl, Some(dec("20")));
}

#[tokio::test]
async fn test_sell_execution_closes_buy_with_loss() {
    let buy = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "0.5", "49960"))
        .with_balance("BTC", dec("0.5"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    reconciler.run_pass(PassMode::Scheduled).await.unwrap();

    let closed = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.realized_pnl, Some(dec("-20")));
}

#[tokio::test]
async fn test_pnl_uses_fill_price_over_requested_price() {
    let mut buy = filled_buy("BTCUSDT", "B1", "1", "50000");
    buy.fill_price = Some(dec("50100"));
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "1", "50200"))
        .with_balance("BTC", dec("1"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    reconciler.run_pass(PassMode::Scheduled).await.unwrap();

    let closed = repo.get_trade(&buy.id).await.unwrap().unwrap();
    // Against the actual fill at 50100, not the requested 50000.
    assert_eq!(closed.realized_pnl, Some(dec("100")));
}

#[tokio::test]
async fn test_sell_claims_at_most_one_buy() {
    let first = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    let second = filled_buy("BTCUSDT", "B2", "0.5", "50000");
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "0.5", "50040"))
        .with_balance("BTC", dec("0.5"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&first).await.unwrap();
    repo.insert_trade(&second).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.sell_closes, 1, "one sell closes exactly one buy");

    let trades = repo
        .query_trades(&user(), &TradeFilter::with_statuses(&[TradeStatus::Closed]))
        .await
        .unwrap();
    let sell_closed: Vec<_> = trades
        .iter()
        .filter(|t| t.side == Side::Buy && t.realized_pnl == Some(dec("20")))
        .collect();
    assert_eq!(sell_closed.len(), 1);
}

#[tokio::test]
async fn test_closest_quantity_wins_the_sell() {
    let near = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    let far = filled_buy("BTCUSDT", "B2", "0.48", "50000");
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "0.5", "50040"))
        .with_balance("BTC", dec("1"));
    let (reconciler, repo, _temp) = setup(mock).await;
    // Insert the worse-quantity candidate first so ordering alone can't win.
    repo.insert_trade(&far).await.unwrap();
    repo.insert_trade(&near).await.unwrap();

    reconciler.run_pass(PassMode::Scheduled).await.unwrap();

    let near_after = repo.get_trade(&near.id).await.unwrap().unwrap();
    let far_after = repo.get_trade(&far.id).await.unwrap().unwrap();
    assert_eq!(near_after.status, TradeStatus::Closed);
    assert_eq!(far_after.status, TradeStatus::Filled);
}

#[tokio::test]
async fn test_sell_before_buy_creation_never_matches() {
    let mut buy = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    buy.created_at = recent(10_000);
    buy.updated_at = buy.created_at;
    let mut sell = sell_execution("BTCUSDT", "S1", "0.5", "50040");
    sell.time = recent(20_000);

    let mock = MockGateway::new()
        .with_history(sell)
        .with_balance("BTC", dec("0.5"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.sell_closes, 0);

    let after = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(after.status, TradeStatus::Filled);
}

#[tokio::test]
async fn test_zero_balance_closes_with_zero_pnl() {
    let buy = filled_buy("ETHUSDT", "B1", "2", "3000");
    // No ETH balance entry at all: absent counts as zero.
    let mock = MockGateway::new().with_balance("USDT", dec("1000"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.balance_closes, 1);

    let closed = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(
        closed.realized_pnl,
        Some(Decimal::ZERO),
        "zero, not null: the close is an accounting event"
    );
}

#[tokio::test]
async fn test_dust_balance_below_epsilon_closes() {
    let buy = filled_buy("ETHUSDT", "B1", "2", "3000");
    let mock = MockGateway::new().with_balance("ETH", dec("0.000005"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.balance_closes, 1);
}

#[tokio::test]
async fn test_live_balance_keeps_position_open() {
    let buy = filled_buy("ETHUSDT", "B1", "2", "3000");
    let mock = MockGateway::new().with_balance("ETH", dec("2"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.balance_closes, 0);

    let after = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(after.status, TradeStatus::Filled);
}

#[tokio::test]
async fn test_closed_position_is_never_closed_again() {
    let buy = filled_buy("BTCUSDT", "B1", "0.5", "50000");
    let mock = MockGateway::new()
        .with_history(sell_execution("BTCUSDT", "S1", "0.5", "50040"))
        .with_balance("BTC", dec("0.5"));
    let (reconciler, repo, _temp) = setup(mock).await;
    repo.insert_trade(&buy).await.unwrap();

    reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    let first = repo.get_trade(&buy.id).await.unwrap().unwrap();

    let summary = reconciler.run_pass(PassMode::Scheduled).await.unwrap();
    assert_eq!(summary.sell_closes, 0);
    assert_eq!(summary.balance_closes, 0);

    let second = repo.get_trade(&buy.id).await.unwrap().unwrap();
    assert_eq!(first, second, "P&L must not be rewritten by a later pass");
}
