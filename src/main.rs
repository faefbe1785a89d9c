mod auth;

use anyhow::{Result, anyhow};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_TOKEN_EXPIRATION_SECS: u64 = 365 * 24 * 60 * 60;
const MAX_CLOCK_SKEW_LEEWAY_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TokenStoreKind {
    Memory,
    File,
}

#[derive(Parser, Debug)]
#[command(name = "credgate")]
#[command(about = "oauth 2.0 client credentials authorization server")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "localhost")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "PORT", default_value = "9096")]
    port: u16,

    /// JSON file with the registered clients: [{"id": "...", "secret": "..."}]
    #[arg(long, env = "CLIENTS_FILE", default_value = "client.json")]
    clients_file: PathBuf,

    /// Signing key for access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Token signing algorithm (HS256, HS384 or HS512)
    #[arg(long, env = "JWT_ALGORITHM", default_value = "HS256")]
    jwt_algorithm: String,

    /// Issuer claim stamped into every token
    #[arg(long, env = "TOKEN_ISSUER", default_value = "credgate")]
    token_issuer: String,

    /// Access token lifetime in seconds (at most one year)
    #[arg(
        long,
        env = "TOKEN_EXPIRATION",
        default_value = "120",
        value_parser = clap::value_parser!(u64).range(..=MAX_TOKEN_EXPIRATION_SECS)
    )]
    token_expiration: u64,

    /// Tolerated clock skew in seconds for tokens issued "in the future" (at most one hour)
    #[arg(
        long,
        env = "CLOCK_SKEW_LEEWAY",
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(..=MAX_CLOCK_SKEW_LEEWAY_SECS)
    )]
    clock_skew_leeway: u64,

    /// Where issued tokens are recorded
    #[arg(long, value_enum, env = "TOKEN_STORE", default_value = "file")]
    token_store: TokenStoreKind,

    /// Token store file (file store only)
    #[arg(long, env = "TOKEN_STORE_PATH", default_value = "token.db")]
    token_store_path: PathBuf,

    /// Seconds between expired-token sweeps (0 = never sweep)
    #[arg(long, env = "STORE_SWEEP_INTERVAL", default_value = "60")]
    store_sweep_interval: u64,

    /// Accept token requests as GET with query parameters
    #[arg(long, env = "ALLOW_GET_TOKEN_REQUEST", default_value = "true", action = clap::ArgAction::Set)]
    allow_get_token_request: bool,

    /// Public base URL for metadata (e.g., https://auth.example.com)
    /// If not set, defaults to http://HOST:PORT
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = auth::ClientRegistry::load(&args.clients_file)?;
    if registry.is_empty() {
        tracing::warn!(
            "No clients registered from {}, every token request will be rejected",
            args.clients_file.display()
        );
    } else {
        tracing::info!(
            "Loaded {} clients from {}",
            registry.len(),
            args.clients_file.display()
        );
    }

    let store: Arc<dyn auth::TokenStore> = match args.token_store {
        TokenStoreKind::Memory => {
            tracing::info!("Using in-memory token store (tokens won't survive a restart)");
            Arc::new(auth::MemoryTokenStore::new())
        }
        TokenStoreKind::File => Arc::new(auth::FileTokenStore::open(&args.token_store_path).await?),
    };

    let config = auth::AuthConfig {
        jwt_secret: args.jwt_secret.clone(),
        jwt_algorithm: args.jwt_algorithm.clone(),
        issuer: args.token_issuer.clone(),
        token_expiration: Duration::from_secs(args.token_expiration),
        clock_skew_leeway: Duration::from_secs(args.clock_skew_leeway),
    };
    let oauth_service = Arc::new(auth::OAuthService::new(config, registry, store)?);
    tracing::info!(
        "Issuing {} tokens valid for {:?}, {} already on record",
        args.jwt_algorithm,
        oauth_service.token_lifetime(),
        oauth_service.stored_tokens().await
    );

    let cancel = CancellationToken::new();

    if args.store_sweep_interval > 0 {
        let sweeper = auth::StoreSweeper::new(
            oauth_service.clone(),
            Duration::from_secs(args.store_sweep_interval),
        );
        let cancel = cancel.clone();
        tokio::spawn(async move { sweeper.run(cancel).await });
    }

    let base_url = match &args.public_url {
        Some(url) => {
            let parsed = url::Url::parse(url)
                .map_err(|e| anyhow!("PUBLIC_URL is not a valid URL ({}): {}", url, e))?;
            parsed.as_str().trim_end_matches('/').to_string()
        }
        None => format!("http://{}:{}", args.host, args.port),
    };

    run_server(&args, oauth_service, base_url, cancel).await
}

async fn run_server(
    args: &Args,
    oauth_service: Arc<auth::OAuthService>,
    base_url: String,
    cancel: CancellationToken,
) -> Result<()> {
    // we pass this to TcpListener::bind() which accepts ToSocketAddrs,
    // so hostnames like "localhost" get resolved properly (unlike SocketAddr::parse)
    let bind_addr = format!("{}:{}", args.host, args.port);

    tracing::info!("Token endpoint: {}/token", base_url);
    tracing::info!("Validation endpoint: {}/validate", base_url);
    tracing::info!(
        "Authorization server metadata: {}/.well-known/oauth-authorization-server",
        base_url
    );

    let oauth_state = auth::OAuthAppState {
        oauth_service: oauth_service.clone(),
        base_url: base_url.clone(),
    };

    // Rate limiting: 10 requests per second per IP, burst of 30
    // SmartIpKeyExtractor checks x-forwarded-for and friends before falling back to peer ip
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(10)
            .burst_size(30)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build rate limiter config"))?,
    );
    let governor_limiter = governor_conf.limiter().clone();
    let rate_limit_layer = GovernorLayer::new(governor_conf);

    // Stricter rate limiting for the token endpoint: 5 requests per second, burst of 10
    let token_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(5)
            .burst_size(10)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build token rate limiter config"))?,
    );
    let token_governor_limiter = token_governor_conf.limiter().clone();
    let token_rate_limit_layer = GovernorLayer::new(token_governor_conf);

    // Trim rate limiter state now and then
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    _ = cancel.cancelled() => break,
                }
                governor_limiter.retain_recent();
                token_governor_limiter.retain_recent();
            }
        }
    });

    let token_route = if args.allow_get_token_request {
        get(auth::token_get_handler).post(auth::token_post_handler)
    } else {
        post(auth::token_post_handler)
    };

    let token_routes = Router::new()
        .route("/token", token_route)
        .layer(token_rate_limit_layer)
        .with_state(oauth_state.clone());

    let metadata_routes = Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(auth::metadata_handler),
        )
        .with_state(oauth_state);

    let auth_config = auth::AuthMiddlewareConfig {
        oauth_service,
        base_url: base_url.clone(),
    };

    // bearer token required
    let protected_routes = Router::new()
        .route("/validate", get(auth::validate_handler))
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::bearer_auth_middleware,
        ))
        .layer(rate_limit_layer);

    let app = metadata_routes
        .merge(token_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server ready at {}", base_url);

    // into_make_service_with_connect_info gives us the peer ip for rate limiting fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["credgate", "--jwt-secret", "12345678"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_lifetime_and_leeway_bounds() {
        let args = parse(&["--token-expiration", "31536000", "--clock-skew-leeway", "3600"]).unwrap();
        assert_eq!(args.token_expiration, MAX_TOKEN_EXPIRATION_SECS);
        assert_eq!(args.clock_skew_leeway, MAX_CLOCK_SKEW_LEEWAY_SECS);

        assert!(parse(&["--token-expiration", "31536001"]).is_err());
        assert!(parse(&["--token-expiration", "18446744073709551615"]).is_err());
        assert!(parse(&["--clock-skew-leeway", "3601"]).is_err());
    }
}
