use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub name: String,
    pub price: Decimal,
    pub symbol: String,
}

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("FINNHUB_API_KEY is missing in .env")]
    MissingKey,

    #[error("quote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("quote provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unknown symbol: {0}")]
    NotFound(String),

    #[error("malformed quote for {symbol}: {detail}")]
    Malformed { symbol: String, detail: String },
}

/// Latest-price lookup. Every failure means "no price this round" to callers
/// that poll; only intake distinguishes `NotFound` for its error message.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError>;

    /// Price only. Implementations that can skip the name lookup should.
    async fn price(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        Ok(self.lookup(symbol).await?.price)
    }
}
