pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository, TradeFilter, TradePatch};
pub use domain::{
    AssetBalance, ExchangeExecution, ExchangeOrderStatus, OrderRequest, Side, Symbol, TimeMs,
    TradeRecord, TradeStatus, UserId,
};
pub use error::AppError;
pub use gateway::{BybitGateway, ExchangeGateway, GatewayError, MockGateway};
pub use orchestration::{PassMode, PassSummary, ReconcileError, Reconciler};
