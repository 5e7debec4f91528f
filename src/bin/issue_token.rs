//! Mints a session token for a user id, for use as a `Bearer` header or in
//! the auth cookie.
//!
//! ```text
//! issue-token [USER_ID_HEX] [USERNAME] [DAYS]
//! ```
//! A fresh id is generated when none is given.

use mongodb::bson::oid::ObjectId;
use rustfinance::{auth, config};

fn main() {
    let settings = config::load();
    let mut args = std::env::args().skip(1);

    let user_id = match args.next() {
        Some(hex) => ObjectId::parse_str(hex.trim()).unwrap_or_else(|e| {
            eprintln!("invalid user id: {e}");
            std::process::exit(2);
        }),
        None => ObjectId::new(),
    };
    let username = args.next();
    let days = args.next().and_then(|d| d.parse::<i64>().ok()).unwrap_or(7);

    match auth::make_jwt_with_days(&settings, &user_id, username.as_deref(), days) {
        Ok(token) => {
            eprintln!("user_id: {}", user_id.to_hex());
            println!("{token}");
        }
        Err(e) => {
            eprintln!("could not sign token: {e}");
            std::process::exit(1);
        }
    }
}
