//! Typed exchange records, built at the gateway boundary.
//!
//! Raw exchange JSON is converted into these types immediately on receipt so
//! internal code never re-interprets loosely-typed payloads.

use crate::domain::{Side, Symbol, TimeMs, TradeStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-reported order status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Deactivated,
}

impl ExchangeOrderStatus {
    pub fn parse(s: &str) -> Option<ExchangeOrderStatus> {
        match s {
            "New" => Some(ExchangeOrderStatus::New),
            "PartiallyFilled" => Some(ExchangeOrderStatus::PartiallyFilled),
            "Filled" => Some(ExchangeOrderStatus::Filled),
            "Cancelled" => Some(ExchangeOrderStatus::Cancelled),
            "Rejected" => Some(ExchangeOrderStatus::Rejected),
            "Deactivated" => Some(ExchangeOrderStatus::Deactivated),
            _ => None,
        }
    }

    /// 1:1 mapping onto the local lifecycle for open/filled orders.
    /// Dead exchange statuses map to `None`; they close locals instead of
    /// creating them.
    pub fn to_local(&self) -> Option<TradeStatus> {
        match self {
            ExchangeOrderStatus::New => Some(TradeStatus::Pending),
            ExchangeOrderStatus::PartiallyFilled => Some(TradeStatus::PartialFilled),
            ExchangeOrderStatus::Filled => Some(TradeStatus::Filled),
            ExchangeOrderStatus::Cancelled
            | ExchangeOrderStatus::Rejected
            | ExchangeOrderStatus::Deactivated => None,
        }
    }

    /// Whether the exchange considers the order alive or executed.
    pub fn is_open_or_filled(&self) -> bool {
        self.to_local().is_some()
    }

    /// Whether the exchange considers the order dead.
    pub fn is_dead(&self) -> bool {
        !self.is_open_or_filled()
    }
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExchangeOrderStatus::New => "New",
            ExchangeOrderStatus::PartiallyFilled => "PartiallyFilled",
            ExchangeOrderStatus::Filled => "Filled",
            ExchangeOrderStatus::Cancelled => "Cancelled",
            ExchangeOrderStatus::Rejected => "Rejected",
            ExchangeOrderStatus::Deactivated => "Deactivated",
        };
        write!(f, "{}", s)
    }
}

/// A point-in-time exchange order/execution snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeExecution {
    pub symbol: Symbol,
    pub side: Side,
    /// Exchange-assigned order id.
    pub external_order_id: String,
    /// Exchange-assigned execution/trade id, when reported.
    pub external_exec_id: Option<String>,
    /// Executed (or cumulative executed) quantity.
    pub quantity: Decimal,
    /// Executed price; for unfilled orders, the order price.
    pub price: Decimal,
    /// Execution/update timestamp.
    pub time: TimeMs,
    pub status: ExchangeOrderStatus,
}

/// A single asset balance reported by the exchange account endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
}

/// Parameters for placing an order through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    /// "Limit" or "Market".
    pub order_type: String,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: String,
}
