use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use peerline::classifier::ModerationClient;
use peerline::store::{ChatStore, MemoryStore, PgStore};
use peerline::{db, handlers, middleware, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Postgres when configured, otherwise the in-memory store for
    // zero-config development.
    let (store, backend): (Arc<dyn ChatStore>, &'static str) =
        match std::env::var("DATABASE_URL").ok() {
            Some(db_url) => {
                let pool = db::create_pool(&db_url)
                    .await
                    .expect("Failed to create database pool.");
                (Arc::new(PgStore::new(pool)), "postgres")
            }
            None => {
                tracing::warn!("DATABASE_URL not set. Using in-memory store; data will not survive restarts.");
                (Arc::new(MemoryStore::new()), "memory")
            }
        };

    // Remote content classifier is optional; the heuristic layer always runs.
    let classifier = match std::env::var("MODERATION_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            let base_url = std::env::var("MODERATION_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/moderations".to_string());
            tracing::info!("Remote content classifier configured");
            Some(ModerationClient::new(api_key, base_url))
        }
        _ => {
            tracing::warn!("MODERATION_API_KEY not found. Using heuristic classification only.");
            None
        }
    };

    let welcome_message = std::env::var("CHAT_WELCOME_MESSAGE").ok().or_else(|| {
        Some(
            "You're now connected with a volunteer listener. This conversation is \
             anonymous and confidential."
                .to_string(),
        )
    });

    let poll_interval = std::env::var("CHAT_POLL_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_millis);

    let shared_state = Arc::new(AppState::new(
        store,
        classifier,
        welcome_message,
        poll_interval,
        backend,
    ));

    let app = Router::new()
        .merge(handlers::sessions::session_routes())
        .merge(handlers::messages::message_routes())
        .merge(handlers::events::event_routes())
        .merge(handlers::feedback::feedback_routes())
        .merge(handlers::admin::admin_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listener.");
    tracing::info!("listening on {}", bind_addr);
    axum::serve(listener, app)
        .await
        .expect("Server error.");
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,peerline=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,peerline=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON for log aggregation in production, human-readable otherwise.
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Peerline starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log level: {}", log_level);

    Ok(())
}

async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.backend,
        "endpoints": {
            "sessions": "/api/chat/sessions",
            "events": "/api/chat/sessions/:id/events",
            "admin": "/api/admin/*",
            "status": "/api/status"
        }
    }))
}
