use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use dotenv::dotenv;
use prompthouse_auth::{
    configure_routes, AppError, AppState, DbOperations, RateLimiters, SessionConfig, Settings,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn cors_for(settings: &Settings) -> Cors {
    settings
        .cors
        .origins()
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .supports_credentials()
        .max_age(settings.cors.max_age as usize)
}

#[actix_web::main]
async fn main() -> prompthouse_auth::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!(mode = config.environment.as_str(), "Configuration loaded successfully");

    // Session setup is fatal when misconfigured
    let session_config = SessionConfig::from_settings(&config).map_err(|e| {
        error!("Invalid session configuration: {}", e);
        e
    })?;
    session_config.log_summary();
    let session_store = session_config.build_store().await?;

    let db = DbOperations::connect(&config.database).await?;
    db.ensure_schema().await?;
    info!(pool = ?db.get_pool_status(), "Database connected");

    let state = web::Data::new(AppState::new(config.clone(), Arc::new(db.clone()))?);
    let limiters = RateLimiters::from_settings(&config);

    // Periodic cleanup of expired limiter windows
    let rate_limiters = limiters.clone();
    let rate_limit_interval = Duration::from_secs(config.rate_limit.cleanup_interval_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(rate_limit_interval).await;
            let removed = rate_limiters.general.limiter().cleanup().await
                + rate_limiters.auth.limiter().cleanup().await;
            if removed > 0 {
                info!("Expired {} rate limit windows", removed);
            }
        }
    });

    // Periodic cleanup of expired sessions
    let expiring_store = session_store.clone();
    let session_interval = Duration::from_secs(config.session.cleanup_interval_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(session_interval).await;
            match expiring_store.clear_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(store = expiring_store.kind(), "Cleared {} expired sessions", removed),
                Err(e) => error!("Failed to clear expired sessions: {}", e),
            }
        }
    });

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let workers = config.server.workers as usize;
    HttpServer::new(move || {
        App::new()
            .wrap(session_config.middleware(session_store.clone()))
            .wrap(cors_for(&config))
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, &limiters))
    })
    .listen(listener)?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    db.close().await;
    info!("Server stopped");
    Ok(())
}
