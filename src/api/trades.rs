use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::db::TradeFilter;
use crate::domain::{Side, Symbol, TimeMs, TradeRecord, TradeStatus};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub symbol: Option<String>,
    pub status: Option<String>,
    pub side: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesResponse {
    pub trades: Vec<TradeDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDto {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub requested_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl From<TradeRecord> for TradeDto {
    fn from(t: TradeRecord) -> Self {
        TradeDto {
            id: t.id,
            symbol: t.symbol.as_str().to_string(),
            side: t.side.to_string(),
            quantity: t.quantity.normalize().to_string(),
            requested_price: t.requested_price.normalize().to_string(),
            fill_price: t.fill_price.map(|p| p.normalize().to_string()),
            external_order_id: t.external_order_id,
            status: t.status.to_string(),
            realized_pnl: t.realized_pnl.map(|p| p.normalize().to_string()),
            created_at_ms: t.created_at.as_ms(),
            updated_at_ms: t.updated_at.as_ms(),
        }
    }
}

pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let symbol = match params.symbol.as_deref() {
        Some("") | None => None,
        Some(s) => Some(Symbol::new(s.to_string())),
    };
    let statuses = match params.status.as_deref() {
        Some("") | None => None,
        Some(s) => {
            let status = TradeStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {}", s)))?;
            Some(vec![status])
        }
    };
    let side = match params.side.as_deref() {
        Some("") | None => None,
        Some(s) => Some(
            Side::parse(s).ok_or_else(|| AppError::BadRequest(format!("Unknown side: {}", s)))?,
        ),
    };

    let filter = TradeFilter {
        symbol,
        statuses,
        side,
        from: params.from_ms.map(TimeMs::new),
        to: params.to_ms.map(TimeMs::new),
    };

    let trades = state
        .repo
        .query_trades(&state.config.user(), &filter)
        .await?;

    Ok(Json(TradesResponse {
        trades: trades.into_iter().map(TradeDto::from).collect(),
    }))
}
