use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dealhub_common::settings::MarketSettings;
use dealhub_server::config::{load_seed, load_settings, Cli};
use dealhub_server::identity::IdentityVerifier;
use dealhub_server::processor::{MockProcessor, PaymentProcessor, StripeProcessor};
use dealhub_server::store::{MemoryStore, StoreSeed};
use dealhub_server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let settings = load_settings(cli.settings.as_deref())?;
    let seed = match &cli.seed {
        Some(path) => load_seed(path)?,
        None => StoreSeed::default(),
    };
    info!(
        listings = seed.listings.len(),
        sellers = seed.sellers.len(),
        "seeding document store"
    );
    let store = MemoryStore::from_seed(seed);
    let verifier = IdentityVerifier::from_hex(&cli.identity_key)
        .map_err(anyhow::Error::msg)
        .context("loading identity provider key")?;

    match cli.stripe_secret_key.clone() {
        Some(key) => {
            let processor =
                StripeProcessor::new(key, cli.stripe_api_base.clone(), cli.remote_timeout())
                    .context("building payment processor client")?;
            serve(&cli, store, processor, settings, verifier).await
        }
        None => {
            tracing::warn!("no processor key configured; payments are simulated in memory");
            serve(&cli, store, MockProcessor::new(), settings, verifier).await
        }
    }
}

async fn serve<P: PaymentProcessor>(
    cli: &Cli,
    store: MemoryStore,
    processor: P,
    settings: MarketSettings,
    verifier: IdentityVerifier,
) -> anyhow::Result<()> {
    let processor_name = processor.name();
    let state = Arc::new(AppState::new(
        store,
        processor,
        settings,
        verifier,
        cli.onboarding_urls(),
        cli.remote_timeout(),
    ));
    let app = router(state);

    let addr = cli.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, processor = processor_name, "dealhub server listening");
    axum::serve(listener, app).await.context("server failed")
}
