use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::quotes::{Quote, QuoteError, QuoteSource};

const BASE_URL: &str = "https://finnhub.io/api/v1";

#[derive(Clone)]
pub struct FinnhubClient {
    http: Client,
    api_key: String,
}

impl FinnhubClient {
    pub fn new(api_key: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { http, api_key }
    }

    fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, symbol: &str) -> Result<T, QuoteError> {
        if !self.has_key() {
            return Err(QuoteError::MissingKey);
        }

        let res = self
            .http
            .get(format!("{BASE_URL}/{path}"))
            .query(&[("symbol", symbol), ("token", &self.api_key)])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(QuoteError::Status { status, body });
        }

        Ok(res.json::<T>().await?)
    }

    pub async fn quote(&self, symbol: &str) -> Result<QuoteResponse, QuoteError> {
        self.get("quote", symbol).await
    }

    pub async fn profile(&self, symbol: &str) -> Result<ProfileResponse, QuoteError> {
        self.get("stock/profile2", symbol).await
    }
}

#[async_trait]
impl QuoteSource for FinnhubClient {
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let sym = symbol.trim().to_uppercase();
        let price = self.price(&sym).await?;

        // profile is best effort; a priced symbol without a profile still trades
        let name = match self.profile(&sym).await {
            Ok(p) => p.name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                tracing::debug!(symbol = %sym, error = %e, "profile lookup failed");
                None
            }
        };

        Ok(Quote {
            name: name.unwrap_or_else(|| sym.clone()),
            price,
            symbol: sym,
        })
    }

    async fn price(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        let sym = symbol.trim().to_uppercase();
        let quote = self.quote(&sym).await?;
        quote.current_price(&sym)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QuoteResponse {
    // current
    pub c: f64,
    // change
    pub d: Option<f64>,
    // percent change
    pub dp: Option<f64>,
    // high
    pub h: f64,
    // low
    pub l: f64,
    // open
    pub o: f64,
    // previous close
    pub pc: f64,
    // timestamp
    pub t: i64,
}

impl QuoteResponse {
    /// Finnhub answers unknown symbols with an all-zero quote.
    pub fn current_price(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        if !self.c.is_finite() {
            return Err(QuoteError::Malformed {
                symbol: symbol.to_string(),
                detail: format!("non-finite price {}", self.c),
            });
        }
        if self.c <= 0.0 {
            return Err(QuoteError::NotFound(symbol.to_string()));
        }

        Decimal::try_from(self.c)
            .map(|d| d.round_dp(4))
            .map_err(|e| QuoteError::Malformed {
                symbol: symbol.to_string(),
                detail: e.to_string(),
            })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub ticker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(c: f64) -> QuoteResponse {
        QuoteResponse { c, d: None, dp: None, h: 0.0, l: 0.0, o: 0.0, pc: 0.0, t: 0 }
    }

    #[test]
    fn zero_price_means_unknown_symbol() {
        assert!(matches!(quote(0.0).current_price("NOPE"), Err(QuoteError::NotFound(s)) if s == "NOPE"));
    }

    #[test]
    fn nan_price_is_malformed() {
        assert!(matches!(quote(f64::NAN).current_price("X"), Err(QuoteError::Malformed { .. })));
    }

    #[test]
    fn price_is_rounded_to_four_places() {
        assert_eq!(quote(187.123456).current_price("AAPL").unwrap(), dec!(187.1235));
    }

    #[test]
    fn unknown_symbol_body_deserializes() {
        let raw = r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#;
        let q: QuoteResponse = serde_json::from_str(raw).unwrap();
        assert!(q.d.is_none());
        assert_eq!(q.c, 0.0);
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client = FinnhubClient::new(String::new());
        assert!(matches!(client.price("AAPL").await, Err(QuoteError::MissingKey)));
    }
}
