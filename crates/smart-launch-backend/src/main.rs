//! SMART launch backend - Entry Point
//!
//! Settings come from the environment (and `.env`), then CLI flags override them.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use smart_launch_backend::config::{Config, api};
use smart_launch_backend::server::BackendServer;

#[derive(Parser, Debug)]
#[command(name = "smart-launch-backend")]
#[command(about = "SMART on FHIR launch and patient data aggregation backend")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value_t = api::DEFAULT_PORT, env = "BACKEND_PORT")]
    port: u16,

    /// OAuth client identifier (overrides CLIENT_ID)
    #[arg(long)]
    client_id: Option<String>,

    /// Redirect URI registered with the authorization server (overrides REDIRECT_URI)
    #[arg(long)]
    redirect_uri: Option<String>,

    /// Presentation layer URL the callback redirects to (overrides FRONTEND_URL)
    #[arg(long)]
    frontend_url: Option<String>,

    /// Issuers allowed to launch the app, comma-separated (overrides ALLOWED_ISSUERS)
    #[arg(long, value_delimiter = ',')]
    allowed_issuers: Option<Vec<String>>,

    /// Disable PKCE for authorization servers that reject it
    #[arg(long)]
    no_pkce: bool,

    /// Serve the /sessions debugging list (session ids are never included)
    #[arg(long)]
    expose_session_list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn build_config(cli: Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(client_id) = cli.client_id {
        config.client_id = client_id;
    }
    match cli.redirect_uri {
        Some(uri) => config.redirect_uri = uri,
        None if std::env::var_os("REDIRECT_URI").is_none() => {
            config.redirect_uri = format!("http://localhost:{}/callback", cli.port);
        }
        None => {}
    }
    if let Some(url) = cli.frontend_url {
        config.frontend_url = url;
    }
    if let Some(issuers) = cli.allowed_issuers {
        config.allowed_issuers = issuers.into_iter().filter(|s| !s.trim().is_empty()).collect();
    }
    if cli.no_pkce {
        config.use_pkce = false;
    }
    if cli.expose_session_list {
        config.expose_session_list = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting SMART launch backend");

    let port = cli.port;
    let config = build_config(cli)?;
    BackendServer::new(config).run_http(port).await?;

    Ok(())
}
