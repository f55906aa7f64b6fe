//! Domain types shared across the reconciliation core.

pub mod execution;
pub mod primitives;
pub mod trade;

pub use execution::{AssetBalance, ExchangeExecution, ExchangeOrderStatus, OrderRequest};
pub use primitives::{Side, Symbol, TimeMs, UserId};
pub use trade::{TradeRecord, TradeStatus};
