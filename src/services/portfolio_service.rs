use std::collections::BTreeMap;

use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{models::TradeRecord, AppState};

#[derive(Debug, Clone, Serialize)]
pub struct HoldingView {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub holdings: Vec<HoldingView>,
    pub cash: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeView {
    pub filled_at: String,
    pub symbol: String,
    pub side: &'static str,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
    pub order_id: Option<String>,
}

/// Net shares per symbol, summed over the trade history. Symbols whose
/// position nets to zero are left out.
pub fn holdings(trades: &[TradeRecord]) -> BTreeMap<String, i64> {
    let mut owns: BTreeMap<String, i64> = BTreeMap::new();
    for t in trades {
        *owns.entry(t.symbol.to_uppercase()).or_default() += t.signed_shares;
    }
    owns.retain(|_, shares| *shares != 0);
    owns
}

pub async fn list_holdings(state: &AppState, user_id: ObjectId) -> Result<BTreeMap<String, i64>, String> {
    let trades = state.ledger.list_trades(user_id).await.map_err(|e| e.to_string())?;
    Ok(holdings(&trades))
}

pub async fn portfolio_view(state: &AppState, user_id: ObjectId) -> Result<PortfolioView, String> {
    let owns = list_holdings(state, user_id).await?;
    let acc = state
        .ledger
        .get_or_create_account(user_id)
        .await
        .map_err(|e| e.to_string())?;

    let mut rows: Vec<HoldingView> = vec![];
    let mut total = acc.cash;

    for (symbol, shares) in owns {
        // an unpriced symbol is shown at zero instead of failing the page
        let (name, price) = match state.quotes.lookup(&symbol).await {
            Ok(q) => (q.name, q.price),
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "no quote for holding");
                (symbol.clone(), Decimal::ZERO)
            }
        };

        // display only; saturate rather than fail the whole page
        let value = price.saturating_mul(Decimal::from(shares));
        total = total.saturating_add(value);

        rows.push(HoldingView {
            symbol,
            name,
            shares,
            price,
            value,
        });
    }

    Ok(PortfolioView {
        holdings: rows,
        cash: acc.cash,
        total,
    })
}

pub async fn history_views(state: &AppState, user_id: ObjectId) -> Result<Vec<TradeView>, String> {
    let trades = state.ledger.list_trades(user_id).await.map_err(|e| e.to_string())?;

    let mut out: Vec<TradeView> = vec![];
    for t in trades.into_iter().rev() {
        let dt = chrono::DateTime::from_timestamp(t.filled_at, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| t.filled_at.to_string());

        out.push(TradeView {
            filled_at: dt,
            symbol: t.symbol.to_uppercase(),
            side: t.side(),
            shares: t.signed_shares,
            price: t.fill_price,
            total: t.fill_price.saturating_mul(Decimal::from(t.signed_shares.unsigned_abs())),
            order_id: t.order_id.map(|id| id.to_hex()),
        });
    }

    Ok(out)
}
