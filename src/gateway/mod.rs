//! Exchange gateway abstraction: typed calls, categorized errors, retry.

use crate::domain::{AssetBalance, ExchangeExecution, OrderRequest, Symbol};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub mod bybit;
pub mod mock;
pub mod retry;

pub use bybit::BybitGateway;
pub use mock::MockGateway;
pub use retry::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, RetryConfig};

/// Error taxonomy for gateway operations.
///
/// Network and rate-limit errors are transient and eligible for retry;
/// authentication, invalid-parameter, and insufficient-balance errors are
/// terminal and must stop the current operation.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("exchange api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("circuit open for endpoint {0}")]
    CircuitOpen(&'static str),
}

/// Backoff category for a retryable error. Rate limits back off slowest,
/// network failures medium, generic transient failures fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    RateLimit,
    Network,
    Generic,
}

impl GatewayError {
    /// Retry category, or `None` for terminal errors.
    pub fn retry_category(&self) -> Option<RetryCategory> {
        match self {
            GatewayError::Network(_) => Some(RetryCategory::Network),
            GatewayError::RateLimited(_) => Some(RetryCategory::RateLimit),
            // Only ret codes the exchange documents as transient retry.
            GatewayError::Api { code, .. } if bybit::is_transient_ret_code(*code) => {
                Some(RetryCategory::Generic)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_category().is_some()
    }
}

/// Exchange collaborator consumed by the reconciliation core.
///
/// Implementations return typed records only: raw payloads are parsed at the
/// boundary and malformed entries dropped with a warning.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Recent order/execution history, newest first, up to `limit` entries.
    async fn get_order_history(&self, limit: u32) -> Result<Vec<ExchangeExecution>, GatewayError>;

    /// Currently open orders.
    async fn get_active_orders(&self) -> Result<Vec<ExchangeExecution>, GatewayError>;

    /// Wallet balances per asset.
    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError>;

    /// Last traded price for a symbol.
    async fn get_market_price(&self, symbol: &Symbol) -> Result<Decimal, GatewayError>;

    /// Place an order; returns the exchange-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError>;
}
