use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// The identity the auth middleware attaches to each request.
///
/// User records themselves live outside this service; only the id is needed
/// to scope balances, trades and orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: ObjectId,

    #[serde(default)]
    pub username: Option<String>,
}
