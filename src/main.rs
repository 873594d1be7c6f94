//! Realtime messaging core
//!
//! WebSocket hub, topic fan-out, contest rooms, and durable notification
//! delivery for the trading platform's live surfaces. Stack: PostgreSQL via
//! sqlx, axum for transport.

#![allow(dead_code)]

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_hub::auth::AuthGate;
use realtime_hub::bridge::ServiceBridge;
use realtime_hub::cache::CacheService;
use realtime_hub::config::Config;
use realtime_hub::db::Database;
use realtime_hub::diagnostics::Diagnostics;
use realtime_hub::hub::Hub;
use realtime_hub::notifications::NotificationDeliverer;
use realtime_hub::rate_limit::RateLimiter;
use realtime_hub::rooms::RoomManager;
use realtime_hub::routes;
use realtime_hub::settings::SettingsService;
use realtime_hub::topics::TopicRouter;
use realtime_hub::transport;
use realtime_hub::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting realtime messaging core");
    tracing::info!("Environment: {}", config.environment);

    let db = Database::new(&config).await?;
    tracing::info!("Database connected");

    let auth = Arc::new(AuthGate::new(config.jwt_secret.clone(), db.pool.clone()));

    let registry = realtime_hub::hub::ConnectionRegistry::new();

    let cache = Arc::new(CacheService::new(db.pool.clone(), config.cache_ttl));

    let settings = Arc::new(SettingsService::new(db.pool.clone()));
    settings.load().await?;

    let chat_limiter = RateLimiter::new(config.chat_rate_limit_per_10s, Duration::from_secs(10));
    let rooms = Arc::new(RoomManager::new(registry.clone(), db.pool.clone(), chat_limiter));

    let notifications = Arc::new(NotificationDeliverer::new(
        db.pool.clone(),
        registry.clone(),
        config.outbox_lookback,
        config.outbox_retention,
        config.outbox_batch_size,
    ));

    let topics = Arc::new(TopicRouter::new(
        registry.clone(),
        db.pool.clone(),
        cache.clone(),
        rooms.clone(),
        notifications.clone(),
        settings.clone(),
    ));

    let (bridge, bridge_handle, bridge_rx) = ServiceBridge::new(topics.clone(), 256);

    let diagnostics = Arc::new(Diagnostics::default());
    let metrics = realtime_hub::monitoring::Metrics::default();

    // One sliding-window limiter per endpoint (§4.3: contest endpoints use
    // 120/min, market endpoints 500/min, everything else the 100/min default).
    let market_limiter = Arc::new(RateLimiter::new(config.rate_limit_market_per_min, Duration::from_secs(60)));
    let contest_limiter = Arc::new(RateLimiter::new(config.rate_limit_contest_per_min, Duration::from_secs(60)));
    let default_limiter = Arc::new(RateLimiter::new(config.rate_limit_default_per_min, Duration::from_secs(60)));
    let message_limiters = std::collections::HashMap::from([
        (realtime_hub::hub::Endpoint::MarketData, market_limiter.clone()),
        (realtime_hub::hub::Endpoint::Contest, contest_limiter.clone()),
        (realtime_hub::hub::Endpoint::Wallet, default_limiter.clone()),
        (realtime_hub::hub::Endpoint::Notifications, default_limiter.clone()),
        (realtime_hub::hub::Endpoint::SystemSettings, default_limiter.clone()),
    ]);

    let hub = Hub::new(
        registry.clone(),
        topics.clone(),
        rooms.clone(),
        notifications.clone(),
        cache.clone(),
        settings.clone(),
        bridge.clone(),
        diagnostics.clone(),
        message_limiters,
        config.outbound_queue_capacity,
    );

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        auth,
        hub,
        diagnostics,
        bridge_handle,
        metrics,
    };

    // Supervised background subsystems (§7): each is restarted in place
    // after a panic, bounded by the restart budget, rather than letting a
    // single subsystem failure take down the process.
    tokio::spawn(bridge.run_supervised(
        bridge_rx,
        config.restart_backoff,
        config.restart_budget,
        config.restart_budget_window,
    ));
    tokio::spawn(notifications.clone().run(config.outbox_poll_interval));
    tokio::spawn(notifications.clone().run_retention_sweep(config.outbox_retention_sweep_interval));
    tokio::spawn(topics.clone().run_contest_refresher(config.leaderboard_refresh_interval));
    tokio::spawn(topics.clone().run_wallet_metrics_refresher(config.wallet_metrics_refresh_interval));
    tokio::spawn(cache_sweeper(cache, config.cache_sweep_interval));
    tokio::spawn(limiter_sweeper(market_limiter, Duration::from_secs(60)));
    tokio::spawn(limiter_sweeper(contest_limiter, Duration::from_secs(60)));
    tokio::spawn(limiter_sweeper(default_limiter, Duration::from_secs(60)));

    tracing::info!("CORS origins configured: {:?}", config.cors_origins);

    let parsed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(e) => {
                tracing::error!("Failed to parse CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static("sec-websocket-protocol"),
        ])
        .expose_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    // Security headers protect the small REST surface; the WebSocket
    // upgrades themselves are guarded by AuthGate, not these.
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        ));

    // Middleware ordering is deliberate: axum applies layers bottom-up, so
    // TraceLayer sees every request first and CORS is evaluated before the
    // handler runs (mirrors the CORB-safe ordering this core inherited).
    let app = Router::new()
        .merge(transport::router())
        .merge(routes::health::router())
        .merge(realtime_hub::monitoring::router())
        .layer(security_headers)
        .layer(cors)
        .layer(axum::middleware::from_fn(
            realtime_hub::middleware::ensure_content_type,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            realtime_hub::monitoring::metrics_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state, config.shutdown_drain))
        .await?;

    Ok(())
}

async fn cache_sweeper(cache: Arc<CacheService>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        cache.sweep().await;
    }
}

async fn limiter_sweeper(limiter: Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        limiter.sweep().await;
    }
}

/// Waits for SIGINT/SIGTERM, then broadcasts SYSTEM `shutdown` to every
/// connected Connection and allows `drain` before returning control to
/// `axum::serve`'s graceful-shutdown path (§5).
async fn shutdown_signal(state: AppState, drain: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
    transport::broadcast_shutdown(&state, drain).await;
}
