//! Bybit V5 REST gateway.
//!
//! All responses arrive in the `{retCode, retMsg, result}` envelope; a
//! non-zero `retCode` is a logical failure even on HTTP 200 and is mapped
//! into the typed error taxonomy here. Raw order rows are converted to
//! [`ExchangeExecution`] immediately; malformed rows are dropped with a
//! warning so one bad record cannot poison a batch.

use crate::domain::{
    AssetBalance, ExchangeExecution, ExchangeOrderStatus, OrderRequest, Side, Symbol, TimeMs,
};
use crate::gateway::retry::{with_retry, BreakerRegistry, CircuitBreakerConfig, RetryConfig};
use crate::gateway::{ExchangeGateway, GatewayError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";

/// Ret codes the exchange documents as transient (system busy / internal
/// timeout); everything else non-zero is terminal for the call.
pub fn is_transient_ret_code(code: i64) -> bool {
    matches!(code, 10016 | 10010)
}

fn map_ret_code(code: i64, message: String) -> GatewayError {
    match code {
        10002 | 10003 | 10004 | 33004 => GatewayError::Authentication(message),
        10001 => GatewayError::InvalidParameter(message),
        110007 | 170131 => GatewayError::InsufficientBalance(message),
        10006 | 10018 => GatewayError::RateLimited(message),
        _ => GatewayError::Api { code, message },
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    symbol: String,
    side: String,
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "execId", default)]
    exec_id: Option<String>,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(default)]
    qty: String,
    #[serde(rename = "cumExecQty", default)]
    cum_exec_qty: String,
    #[serde(default)]
    price: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(rename = "updatedTime", default)]
    updated_time: String,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    coin: Vec<RawCoinBalance>,
}

#[derive(Debug, Deserialize)]
struct RawCoinBalance {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    #[serde(rename = "orderId")]
    order_id: String,
}

/// Bybit V5 spot gateway with signed requests, categorized retry, and a
/// circuit breaker per logical endpoint.
pub struct BybitGateway {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    retry: RetryConfig,
    breakers: BreakerRegistry,
}

impl BybitGateway {
    pub fn new(
        base_url: String,
        api_key: String,
        api_secret: String,
        timeout: Duration,
        retry: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        BybitGateway {
            client,
            base_url,
            api_key,
            api_secret,
            retry,
            breakers: BreakerRegistry::new(breaker_config),
        }
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn map_transport_error(err: reqwest::Error) -> GatewayError {
        // Timeouts count as network errors and stay retryable.
        GatewayError::Network(err.to_string())
    }

    fn check_http_status(status: reqwest::StatusCode) -> Result<(), GatewayError> {
        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited(format!("http {}", status)));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GatewayError::Authentication(format!("http {}", status)));
        }
        if status.is_server_error() {
            return Err(GatewayError::Network(format!("http {}", status)));
        }
        if !status.is_success() {
            return Err(GatewayError::Api {
                code: i64::from(status.as_u16()),
                message: "unexpected http status".to_string(),
            });
        }
        Ok(())
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, GatewayError> {
        let timestamp = TimeMs::now().as_ms().to_string();
        let signature = self.sign(&timestamp, query);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::check_http_status(response.status())?;

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        Self::unwrap_envelope(envelope)
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let body_str =
            serde_json::to_string(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let timestamp = TimeMs::now().as_ms().to_string();
        let signature = self.sign(&timestamp, &body_str);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Self::check_http_status(response.status())?;

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        Self::unwrap_envelope(envelope)
    }

    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, GatewayError> {
        if envelope.ret_code != 0 {
            return Err(map_ret_code(envelope.ret_code, envelope.ret_msg));
        }
        envelope
            .result
            .ok_or_else(|| GatewayError::Parse("missing result in envelope".to_string()))
    }

    fn parse_orders(raw: Vec<RawOrder>) -> Vec<ExchangeExecution> {
        let mut out = Vec::with_capacity(raw.len());
        for order in raw {
            match parse_order(&order) {
                Ok(execution) => out.push(execution),
                Err(reason) => {
                    warn!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        reason,
                        "dropping malformed exchange order record"
                    );
                }
            }
        }
        out
    }
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, String> {
    Decimal::from_str(s).map_err(|_| format!("invalid {}: {:?}", field, s))
}

fn parse_order(raw: &RawOrder) -> Result<ExchangeExecution, String> {
    let side = Side::parse(&raw.side).ok_or_else(|| format!("unknown side {:?}", raw.side))?;
    let status = ExchangeOrderStatus::parse(&raw.order_status)
        .ok_or_else(|| format!("unknown order status {:?}", raw.order_status))?;

    // Executed quantity for (partially) filled orders, order quantity for
    // still-open ones.
    let cum_exec = if raw.cum_exec_qty.is_empty() {
        Decimal::ZERO
    } else {
        parse_decimal(&raw.cum_exec_qty, "cumExecQty")?
    };
    let quantity = if cum_exec > Decimal::ZERO {
        cum_exec
    } else {
        parse_decimal(&raw.qty, "qty")?
    };
    if quantity <= Decimal::ZERO {
        return Err("non-positive quantity".to_string());
    }

    let avg_price = if raw.avg_price.is_empty() {
        Decimal::ZERO
    } else {
        parse_decimal(&raw.avg_price, "avgPrice")?
    };
    let price = if avg_price > Decimal::ZERO {
        avg_price
    } else {
        parse_decimal(&raw.price, "price")?
    };

    let time = raw
        .updated_time
        .parse::<i64>()
        .map_err(|_| format!("invalid updatedTime: {:?}", raw.updated_time))?;

    Ok(ExchangeExecution {
        symbol: Symbol::new(raw.symbol.clone()),
        side,
        external_order_id: raw.order_id.clone(),
        external_exec_id: raw.exec_id.clone(),
        quantity,
        price,
        time: TimeMs::new(time),
        status,
    })
}

#[async_trait]
impl ExchangeGateway for BybitGateway {
    async fn get_order_history(&self, limit: u32) -> Result<Vec<ExchangeExecution>, GatewayError> {
        let breaker = self.breakers.get("order_history");
        let query = format!("category=spot&limit={}", limit);
        let raw: ListResult<RawOrder> =
            with_retry(&self.retry, &breaker, "order_history", || {
                self.get_signed("/v5/order/history", &query)
            })
            .await?;
        Ok(Self::parse_orders(raw.list))
    }

    async fn get_active_orders(&self) -> Result<Vec<ExchangeExecution>, GatewayError> {
        let breaker = self.breakers.get("active_orders");
        let raw: ListResult<RawOrder> = with_retry(&self.retry, &breaker, "active_orders", || {
            self.get_signed("/v5/order/realtime", "category=spot")
        })
        .await?;
        Ok(Self::parse_orders(raw.list))
    }

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        let breaker = self.breakers.get("wallet_balance");
        let raw: ListResult<RawAccount> =
            with_retry(&self.retry, &breaker, "wallet_balance", || {
                self.get_signed("/v5/account/wallet-balance", "accountType=UNIFIED")
            })
            .await?;

        let mut balances = Vec::new();
        for account in raw.list {
            for coin in account.coin {
                match Decimal::from_str(&coin.wallet_balance) {
                    Ok(wallet_balance) => balances.push(AssetBalance {
                        asset: coin.coin,
                        wallet_balance,
                    }),
                    Err(_) => warn!(
                        asset = %coin.coin,
                        raw = %coin.wallet_balance,
                        "dropping balance entry with unparseable amount"
                    ),
                }
            }
        }
        Ok(balances)
    }

    async fn get_market_price(&self, symbol: &Symbol) -> Result<Decimal, GatewayError> {
        let breaker = self.breakers.get("tickers");
        let query = format!("category=spot&symbol={}", symbol.as_str());
        let raw: ListResult<RawTicker> = with_retry(&self.retry, &breaker, "tickers", || {
            self.get_signed("/v5/market/tickers", &query)
        })
        .await?;

        let ticker = raw
            .list
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Parse(format!("no ticker for {}", symbol)))?;
        Decimal::from_str(&ticker.last_price)
            .map_err(|_| GatewayError::Parse(format!("invalid lastPrice {:?}", ticker.last_price)))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let breaker = self.breakers.get("place_order");
        let side = match request.side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };
        let mut body = serde_json::json!({
            "category": "spot",
            "symbol": request.symbol.as_str(),
            "side": side,
            "orderType": request.order_type,
            "qty": request.qty.normalize().to_string(),
            "timeInForce": request.time_in_force,
        });
        if let Some(price) = request.price {
            body["price"] = serde_json::Value::String(price.normalize().to_string());
        }

        let placed: PlacedOrder = with_retry(&self.retry, &breaker, "place_order", || {
            self.post_signed("/v5/order/create", &body)
        })
        .await?;
        Ok(placed.order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_order(status: &str, qty: &str, cum: &str, price: &str, avg: &str) -> RawOrder {
        RawOrder {
            symbol: "BTCUSDT".to_string(),
            side: "Buy".to_string(),
            order_id: "X1".to_string(),
            exec_id: None,
            order_status: status.to_string(),
            qty: qty.to_string(),
            cum_exec_qty: cum.to_string(),
            price: price.to_string(),
            avg_price: avg.to_string(),
            updated_time: "1700000000000".to_string(),
        }
    }

    #[test]
    fn test_parse_filled_order_uses_executed_quantity_and_avg_price() {
        let raw = raw_order("Filled", "1.0", "0.998", "50000", "50012.5");
        let exec = parse_order(&raw).unwrap();
        assert_eq!(exec.quantity, Decimal::from_str("0.998").unwrap());
        assert_eq!(exec.price, Decimal::from_str("50012.5").unwrap());
        assert_eq!(exec.status, ExchangeOrderStatus::Filled);
    }

    #[test]
    fn test_parse_new_order_falls_back_to_order_fields() {
        let raw = raw_order("New", "2.0", "0", "49000", "");
        let exec = parse_order(&raw).unwrap();
        assert_eq!(exec.quantity, Decimal::from_str("2.0").unwrap());
        assert_eq!(exec.price, Decimal::from_str("49000").unwrap());
    }

    #[test]
    fn test_parse_rejects_zero_quantity() {
        let raw = raw_order("Filled", "0", "0", "50000", "");
        assert!(parse_order(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let raw = raw_order("Untriggered", "1", "0", "50000", "");
        assert!(parse_order(&raw).is_err());
    }

    #[test]
    fn test_ret_code_mapping() {
        assert!(matches!(
            map_ret_code(10003, "bad key".into()),
            GatewayError::Authentication(_)
        ));
        assert!(matches!(
            map_ret_code(10001, "bad qty".into()),
            GatewayError::InvalidParameter(_)
        ));
        assert!(matches!(
            map_ret_code(110007, "no funds".into()),
            GatewayError::InsufficientBalance(_)
        ));
        assert!(matches!(
            map_ret_code(10006, "too fast".into()),
            GatewayError::RateLimited(_)
        ));
        assert!(matches!(
            map_ret_code(12345, "other".into()),
            GatewayError::Api { code: 12345, .. }
        ));
    }

    #[test]
    fn test_envelope_nonzero_ret_code_fails_even_with_result() {
        let envelope = ApiEnvelope {
            ret_code: 10001,
            ret_msg: "parameter error".to_string(),
            result: Some(ListResult::<RawOrder> { list: vec![] }),
        };
        let err = BybitGateway::unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParameter(_)));
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let gateway = BybitGateway::new(
            "https://api.example.invalid".to_string(),
            "key".to_string(),
            "secret".to_string(),
            Duration::from_secs(5),
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
        );
        let a = gateway.sign("1700000000000", "category=spot");
        let b = gateway.sign("1700000000000", "category=spot");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
