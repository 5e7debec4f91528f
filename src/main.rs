use std::{net::SocketAddr, sync::Arc};

use mongodb::Client;
use tracing_subscriber::EnvFilter;

use rustfinance::{
    config::{self, LedgerBackend},
    routes,
    services::{
        db_init,
        finnhub::FinnhubClient,
        ledger::{memory::MemoryLedger, mongo::MongoLedger, LedgerStore},
    },
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let settings = config::load();

    let ledger: Arc<dyn LedgerStore> = match settings.ledger_backend {
        LedgerBackend::Mongo => {
            let client = Client::with_uri_str(&settings.mongodb_uri)
                .await
                .expect("Failed to connect to MongoDB");
            let ledger = MongoLedger::new(client, &settings.mongodb_db, settings.starting_cash);

            db_init::ensure_indexes(ledger.database())
                .await
                .expect("Failed to create MongoDB indexes");
            Arc::new(ledger)
        }
        LedgerBackend::Memory => {
            tracing::warn!("using in-memory ledger; balances are lost on restart");
            Arc::new(MemoryLedger::new(settings.starting_cash))
        }
    };

    if settings.finnhub_api_key.trim().is_empty() {
        tracing::warn!("FINNHUB_API_KEY is not set; quote lookups will fail");
    }
    let quotes = Arc::new(FinnhubClient::new(settings.finnhub_api_key.clone()));

    let state = AppState::new(settings.clone(), ledger, quotes);

    match state.engine.resume_open_orders().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(resumed = n, "resumed open limit orders"),
        Err(e) => tracing::error!(error = %e, "could not resume open limit orders"),
    }

    let app = routes::app(state);

    let ip = settings
        .host
        .parse::<std::net::IpAddr>()
        .expect("HOST must be an IP address");
    let addr = SocketAddr::from((ip, settings.port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .unwrap();
}
