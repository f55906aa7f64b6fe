//! Local trade record and its lifecycle state machine.

use crate::domain::{Side, Symbol, TimeMs, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a local trade record.
///
/// Allowed transitions for a buy-side position:
/// `pending -> {filled, cancelled}`, `filled <-> partial_filled`,
/// `{filled, partial_filled} -> closed`. `cancelled` and `closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    PartialFilled,
    Filled,
    Cancelled,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::PartialFilled => "partial_filled",
            TradeStatus::Filled => "filled",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<TradeStatus> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "partial_filled" => Some(TradeStatus::PartialFilled),
            "filled" => Some(TradeStatus::Filled),
            "cancelled" => Some(TradeStatus::Cancelled),
            "closed" => Some(TradeStatus::Closed),
            _ => None,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Cancelled | TradeStatus::Closed)
    }

    /// Statuses eligible for position-close detection.
    pub fn is_matchable(&self) -> bool {
        matches!(self, TradeStatus::Filled | TradeStatus::PartialFilled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        match (self, next) {
            (Pending, Filled) | (Pending, PartialFilled) | (Pending, Cancelled) => true,
            (Filled, PartialFilled) | (Filled, Closed) => true,
            (PartialFilled, Filled) | (PartialFilled, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locally recorded trade, owned by the ledger store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Internal id (opaque, stable).
    pub id: String,
    /// Owner of the record.
    pub user: UserId,
    pub symbol: Symbol,
    pub side: Side,
    /// Ordered quantity; always positive.
    pub quantity: Decimal,
    /// Price the order was placed at; always positive.
    pub requested_price: Decimal,
    /// Actual executed price, populated on execution.
    pub fill_price: Option<Decimal>,
    /// Exchange-assigned order id; authoritative for matching once known.
    pub external_order_id: Option<String>,
    /// Exchange-assigned execution/trade id.
    pub external_exec_id: Option<String>,
    pub status: TradeStatus,
    /// Realized profit/loss; meaningful only once `closed`/`cancelled`.
    pub realized_pnl: Option<Decimal>,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl TradeRecord {
    /// Create a fresh record with a generated internal id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user: UserId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        requested_price: Decimal,
        external_order_id: Option<String>,
        status: TradeStatus,
        created_at: TimeMs,
    ) -> Self {
        TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user,
            symbol,
            side,
            quantity,
            requested_price,
            fill_price: None,
            external_order_id,
            external_exec_id: None,
            status,
            realized_pnl: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// The price a sale would realize P&L against: actual fill price when
    /// known, otherwise the requested price.
    pub fn effective_price(&self) -> Decimal {
        self.fill_price.unwrap_or(self.requested_price)
    }

    /// Non-positive quantity or price is a corruption signal, not a state.
    pub fn is_economically_valid(&self) -> bool {
        self.quantity > Decimal::ZERO && self.requested_price > Decimal::ZERO
    }
}
