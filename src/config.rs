use crate::domain::UserId;
use crate::engine::MatchTolerances;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Service configuration, loaded from the environment.
///
/// The matching/healing thresholds default to the canonical contract values
/// (5% relative quantity, 0.001 absolute quantity, 0.01 price, 1e-5 balance)
/// and are overridable per deployment so they live in exactly one place.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub bybit_api_url: String,
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    /// Ledger owner; one service instance reconciles one account.
    pub account_id: String,
    /// Reconciliation lookback window in milliseconds.
    pub lookback_ms: i64,
    /// Max order-history entries fetched per pass.
    pub history_limit: u32,
    /// Scheduled pass interval in seconds.
    pub reconcile_interval_secs: u64,
    /// Gateway request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub qty_tolerance_pct: Decimal,
    pub qty_tolerance_abs: Decimal,
    pub price_epsilon: Decimal,
    pub balance_epsilon: Decimal,
    /// Quote-asset suffixes used to derive a base asset from a symbol.
    pub quote_assets: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parsed<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parsed::<u16>(&env_map, "PORT", "8080", "must be a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let bybit_api_url = required(&env_map, "BYBIT_API_URL")?;
        let bybit_api_key = required(&env_map, "BYBIT_API_KEY")?;
        let bybit_api_secret = required(&env_map, "BYBIT_API_SECRET")?;
        let account_id = required(&env_map, "ACCOUNT_ID")?;

        let lookback_ms =
            parsed::<i64>(&env_map, "LOOKBACK_MS", "86400000", "must be a valid i64")?;
        let history_limit =
            parsed::<u32>(&env_map, "HISTORY_LIMIT", "200", "must be a valid u32")?;
        let reconcile_interval_secs = parsed::<u64>(
            &env_map,
            "RECONCILE_INTERVAL_SECS",
            "60",
            "must be a valid u64",
        )?;
        let request_timeout_ms = parsed::<u64>(
            &env_map,
            "REQUEST_TIMEOUT_MS",
            "10000",
            "must be a valid u64",
        )?;

        let qty_tolerance_pct = parsed::<Decimal>(
            &env_map,
            "QTY_TOLERANCE_PCT",
            "0.05",
            "must be a decimal fraction",
        )?;
        let qty_tolerance_abs = parsed::<Decimal>(
            &env_map,
            "QTY_TOLERANCE_ABS",
            "0.001",
            "must be a decimal quantity",
        )?;
        let price_epsilon =
            parsed::<Decimal>(&env_map, "PRICE_EPSILON", "0.01", "must be a decimal price")?;
        let balance_epsilon = parsed::<Decimal>(
            &env_map,
            "BALANCE_EPSILON",
            "0.00001",
            "must be a decimal quantity",
        )?;

        let quote_assets = env_map
            .get("QUOTE_ASSETS")
            .map(|s| s.as_str())
            .unwrap_or("USDT,USDC,USD")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            port,
            database_path,
            bybit_api_url,
            bybit_api_key,
            bybit_api_secret,
            account_id,
            lookback_ms,
            history_limit,
            reconcile_interval_secs,
            request_timeout_ms,
            qty_tolerance_pct,
            qty_tolerance_abs,
            price_epsilon,
            balance_epsilon,
            quote_assets,
        })
    }

    pub fn user(&self) -> UserId {
        UserId::new(self.account_id.clone())
    }

    pub fn match_tolerances(&self) -> MatchTolerances {
        MatchTolerances::new(self.qty_tolerance_pct, self.qty_tolerance_abs)
    }
}
