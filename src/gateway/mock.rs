//! Mock gateway for testing without network calls.

use crate::domain::{AssetBalance, ExchangeExecution, OrderRequest, Symbol};
use crate::gateway::{ExchangeGateway, GatewayError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mock gateway that serves predefined data and optional injected failures.
#[derive(Debug, Default)]
pub struct MockGateway {
    history: Vec<ExchangeExecution>,
    active: Vec<ExchangeExecution>,
    balances: Vec<AssetBalance>,
    prices: HashMap<Symbol, Decimal>,
    history_error: Option<GatewayError>,
    active_error: Option<GatewayError>,
    balance_error: Option<GatewayError>,
    placed_orders: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, execution: ExchangeExecution) -> Self {
        self.history.push(execution);
        self
    }

    pub fn with_active(mut self, execution: ExchangeExecution) -> Self {
        self.active.push(execution);
        self
    }

    pub fn with_balance(mut self, asset: impl Into<String>, wallet_balance: Decimal) -> Self {
        self.balances.push(AssetBalance {
            asset: asset.into(),
            wallet_balance,
        });
        self
    }

    pub fn with_price(mut self, symbol: Symbol, price: Decimal) -> Self {
        self.prices.insert(symbol, price);
        self
    }

    pub fn with_history_error(mut self, error: GatewayError) -> Self {
        self.history_error = Some(error);
        self
    }

    pub fn with_active_error(mut self, error: GatewayError) -> Self {
        self.active_error = Some(error);
        self
    }

    pub fn with_balance_error(mut self, error: GatewayError) -> Self {
        self.balance_error = Some(error);
        self
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn get_order_history(&self, limit: u32) -> Result<Vec<ExchangeExecution>, GatewayError> {
        if let Some(err) = &self.history_error {
            return Err(err.clone());
        }
        Ok(self.history.iter().take(limit as usize).cloned().collect())
    }

    async fn get_active_orders(&self) -> Result<Vec<ExchangeExecution>, GatewayError> {
        if let Some(err) = &self.active_error {
            return Err(err.clone());
        }
        Ok(self.active.clone())
    }

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        if let Some(err) = &self.balance_error {
            return Err(err.clone());
        }
        Ok(self.balances.clone())
    }

    async fn get_market_price(&self, symbol: &Symbol) -> Result<Decimal, GatewayError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::InvalidParameter(format!("unknown symbol {}", symbol)))
    }

    async fn place_order(&self, _request: &OrderRequest) -> Result<String, GatewayError> {
        let n = self.placed_orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-order-{}", n))
    }
}
