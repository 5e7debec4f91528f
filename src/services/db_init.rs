use mongodb::{
    bson::{doc, Document},
    Database, IndexModel,
};

use super::ledger::mongo::{OPEN_ORDERS, OUTCOMES, TRADES};

pub async fn ensure_indexes(db: &Database) -> Result<(), String> {
    // trades: net position per (user_id, symbol)
    {
        let col = db.collection::<Document>(TRADES);
        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "symbol": 1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    // trades: history by user, chronological
    {
        let col = db.collection::<Document>(TRADES);
        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "filled_at": 1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    // open_orders: listed and cleared per user
    {
        let col = db.collection::<Document>(OPEN_ORDERS);
        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "submitted_at": -1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    // order_outcomes: status page sorts by closed_at desc
    {
        let col = db.collection::<Document>(OUTCOMES);
        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "closed_at": -1 })
            .build();

        let _ = col.create_index(model, None).await;
    }

    Ok(())
}
