use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of the append-only trade history.
///
/// `signed_shares` is positive for buys and negative for sells, so the net
/// position of a symbol is the plain sum over its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,

    // limit order that produced this fill; None for market trades
    #[serde(default)]
    pub order_id: Option<ObjectId>,

    pub symbol: String,
    pub signed_shares: i64,
    pub fill_price: Decimal,
    pub filled_at: i64,
}

impl TradeRecord {
    pub fn side(&self) -> &'static str {
        if self.signed_shares < 0 { "sell" } else { "buy" }
    }
}
