use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    // use user id as primary key
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub cash: Decimal,
    pub updated_at: i64,

    // bumped on every cash write, used as a compare-and-set guard
    #[serde(default)]
    pub version: i64,
}

impl Account {
    pub fn new(id: ObjectId, cash: Decimal, now: i64) -> Self {
        Self {
            id,
            cash,
            updated_at: now,
            version: 0,
        }
    }
}
