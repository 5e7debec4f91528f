use std::collections::HashMap;

use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;

use crate::{models::Account, AppState};

use super::{ledger::LedgerError, FieldErrors};

/// Gets the user's account. If missing, creates it with the starting balance.
pub async fn get_or_create_account(state: &AppState, user_id: ObjectId) -> Result<Account, String> {
    state
        .ledger
        .get_or_create_account(user_id)
        .await
        .map_err(|e| e.to_string())
}

/// Adds simulated funds and returns the new balance.
pub async fn add_cash(state: &AppState, user_id: ObjectId, amount: Decimal) -> Result<Decimal, FieldErrors> {
    let mut errs: FieldErrors = HashMap::new();

    if amount <= Decimal::ZERO {
        errs.insert("amount".into(), "Enter a positive amount.".into());
        return Err(errs);
    }

    let deposited = {
        let _guard = state.engine.lock_user(user_id).await;
        state.ledger.deposit(user_id, amount).await
    };

    let new_cash = match deposited {
        Ok(c) => c,
        Err(LedgerError::AmountOutOfRange) => {
            errs.insert("amount".into(), "That amount is too large.".into());
            return Err(errs);
        }
        Err(e) => {
            errs.insert("_form".into(), e.to_string());
            return Err(errs);
        }
    };

    tracing::info!(user_id = %user_id, amount = %amount, cash = %new_cash, "cash added");
    state.notify(&["cashUpdated"]);

    Ok(new_cash)
}
