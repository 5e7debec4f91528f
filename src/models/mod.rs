pub mod user;
pub mod account;
pub mod order;
pub mod trade;

pub use user::CurrentUser;
pub use account::Account;
pub use order::{OpenOrder, OrderIntent, OrderOutcome, OrderStatus, Side};
pub use trade::TradeRecord;
