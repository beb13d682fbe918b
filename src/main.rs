use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    Router,
};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use taskforge::{
    config::Config,
    core::{
        jobs::{register_builtin_handlers, HandlerRegistry, JobScheduler},
        timers::{TimerPreset, TimerScheduler},
    },
    routes::create_api_router,
    AppState,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::init()?;

    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry)?;
    let scheduler = JobScheduler::new(config.scheduler.clone(), registry);

    let timers = Arc::new(TimerScheduler::new());
    for name in &config.timer_presets {
        match name.parse::<TimerPreset>() {
            Ok(preset) => {
                timers.start_preset(preset)?;
            }
            Err(e) => warn!(preset = %name, error = %e, "Skipping unknown timer preset"),
        }
    }

    // Serve health and readiness while the scheduler connects.
    let initializing = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = initializing.initialize().await {
            error!(error = %e, "❌ Job scheduler failed to initialize");
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(config.client_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    let app_state = AppState {
        env: Arc::new(config.clone()),
        scheduler: scheduler.clone(),
        timers: Arc::clone(&timers),
    };

    let app = Router::new()
        .nest("/api", create_api_router())
        .layer(cors)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    info!("🚀 Server started successfully on port {}", config.port);
    info!("📊 Health check: http://localhost:{}/api/healthchecker", config.port);
    info!("🗄️  Job collection: {}", config.scheduler.collection);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    timers.stop_all_tasks();
    scheduler.shutdown(SHUTDOWN_GRACE).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
