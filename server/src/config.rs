use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use dealhub_common::settings::MarketSettings;

use crate::state::OnboardingUrls;
use crate::store::StoreSeed;

#[derive(Parser, Debug, Clone)]
#[command(name = "dealhub-server", about = "Deals marketplace settlement service")]
pub struct Cli {
    /// HTTP port to listen on.
    #[arg(long, env = "DEALHUB_PORT", default_value_t = 3080)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "DEALHUB_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Market settings JSON (fee table, shipping, slot capacity, boost prices).
    /// Defaults to `<config dir>/dealhub/settings.json` when that file exists.
    #[arg(long, env = "DEALHUB_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Listings and sellers to preload into the in-memory store.
    #[arg(long, env = "DEALHUB_SEED")]
    pub seed: Option<PathBuf>,

    /// Payment processor secret key. Without it the in-memory processor is used.
    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    pub stripe_secret_key: Option<String>,

    /// Override the processor API base URL.
    #[arg(long, env = "STRIPE_API_BASE")]
    pub stripe_api_base: Option<String>,

    /// Hex-encoded ed25519 public key of the identity provider.
    #[arg(long, env = "DEALHUB_IDENTITY_KEY")]
    pub identity_key: String,

    /// Where sellers land after onboarding; `{seller_id}` is substituted.
    #[arg(long, env = "DEALHUB_ONBOARDING_RETURN_URL")]
    pub onboarding_return_url: Option<String>,

    /// Where sellers go when an onboarding link has expired.
    #[arg(long, env = "DEALHUB_ONBOARDING_REFRESH_URL")]
    pub onboarding_refresh_url: Option<String>,

    /// Deadline for each store or processor call, in milliseconds.
    #[arg(long, env = "DEALHUB_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Log filter, e.g. `info` or `dealhub_server=debug`. `RUST_LOG` wins when set.
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl Cli {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn onboarding_urls(&self) -> OnboardingUrls {
        let defaults = OnboardingUrls::default();
        OnboardingUrls {
            return_url: self
                .onboarding_return_url
                .clone()
                .unwrap_or(defaults.return_url),
            refresh_url: self
                .onboarding_refresh_url
                .clone()
                .unwrap_or(defaults.refresh_url),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dealhub").join("settings.json"))
}

/// Load market settings. An explicit path must exist; the default path is
/// optional and built-in defaults apply when it is absent.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<MarketSettings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_settings_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => return Ok(MarketSettings::default()),
        },
    };
    let data = std::fs::read_to_string(&path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings = serde_json::from_str(&data)
        .with_context(|| format!("parsing settings in {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded market settings");
    Ok(settings)
}

pub fn load_seed(path: &Path) -> anyhow::Result<StoreSeed> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed data from {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing seed data in {}", path.display()))
}
