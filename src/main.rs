use axum::{http::StatusCode, response::Json, routing::get, Router};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod domain;
mod errors;
mod gateway;
mod handlers;
mod mailer;
mod middleware;
mod models;
mod sweep;

use config::Config;
use gateway::{LipwaClient, PalmPesaClient};
use handlers::{assignments, payments, sessions, tasks, users, withdrawals};
use mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub lipwa: LipwaClient,
    pub palmpesa: PalmPesaClient,
    pub mailer: Mailer,
}

#[cfg(test)]
impl AppState {
    /// State wired to a test database; outbound clients point at a closed
    /// port and the mailer is disabled.
    pub(crate) fn for_tests(db: PgPool) -> Self {
        let config = Arc::new(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: String::new(),
            allowed_origins: vec!["https://kazipesa.co.tz".to_string()],
            admin_token: "test-admin-token".to_string(),
            daily_task_limit: 20,
            gateway_timeout: std::time::Duration::from_secs(1),
            lipwa: config::LipwaConfig {
                base_url: "http://127.0.0.1:9/api/v1/".parse().unwrap(),
                api_key: String::new(),
                channel_id: String::new(),
                callback_url: "http://127.0.0.1:9/callback".to_string(),
            },
            palmpesa: config::PalmPesaConfig {
                base_url: "http://127.0.0.1:9/api/v1/".parse().unwrap(),
                api_token: String::new(),
            },
            mail: config::MailConfig {
                api_url: "http://127.0.0.1:9/send".parse().unwrap(),
                access_token: String::new(),
                from_address: "test@example.com".to_string(),
                enabled: false,
            },
        });

        AppState {
            db,
            lipwa: LipwaClient::new(config.lipwa.clone(), config.gateway_timeout)
                .expect("lipwa test client"),
            palmpesa: PalmPesaClient::new(config.palmpesa.clone(), config.gateway_timeout)
                .expect("palmpesa test client"),
            mailer: Mailer::new(config.mail.clone(), config.gateway_timeout)
                .expect("test mailer"),
            config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with reduced SQL verbosity
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("kazipesa_backend=info,sqlx=warn,info"))
        .init();

    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);

    let pool = database::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to PostgreSQL");

    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            warn!("Failed to run migrations: {}", e);
            return Err(e.into());
        }
    }

    let state = AppState {
        db: pool,
        config: config.clone(),
        lipwa: LipwaClient::new(config.lipwa.clone(), config.gateway_timeout)?,
        palmpesa: PalmPesaClient::new(config.palmpesa.clone(), config.gateway_timeout)?,
        mailer: Mailer::new(config.mail.clone(), config.gateway_timeout)?,
    };

    sweep::spawn(state.clone());

    // CORS: echo back only allow-listed origins; anything else is refused.
    let origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping unparsable origin '{}': {}", origin, e);
                None
            }
        })
        .collect();
    info!("CORS configured for {} origins", origins.len());

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            "X-Admin-Token".parse().unwrap(),
        ]);

    // STK-push initiations are rate limited per client IP; a mashed "Pay"
    // button must not fire a burst of gateway calls.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("valid governor configuration"),
    );

    let payment_routes = Router::new()
        .nest("/api/payments", payments::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::origin_allowlist_middleware,
                ))
                .layer(cors.clone())
                .layer(GovernorLayer {
                    config: governor_config,
                }),
        )
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/tasks", tasks::router())
        .nest("/api/assignments", assignments::router())
        .nest("/api/withdrawals", withdrawals::router())
        .nest("/api/sessions", sessions::router())
        .nest("/api/users", users::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::origin_allowlist_middleware,
                ))
                .layer(cors.clone()),
        )
        .with_state(state.clone());

    let admin_routes = Router::new()
        .nest("/api/admin/tasks", tasks::admin_router())
        .nest("/api/admin/assignments", assignments::admin_router())
        .nest("/api/admin/users", users::admin_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::origin_allowlist_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::admin_auth_middleware,
                ))
                .layer(cors),
        )
        .with_state(state);

    let app = public_routes.merge(payment_routes).merge(admin_routes);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "error": false,
        "status": "healthy",
        "service": "kazipesa-backend",
        "timestamp": chrono::Utc::now(),
        "endpoints": {
            "tasks": "/api/tasks",
            "assignments": "/api/assignments",
            "withdrawals": "/api/withdrawals",
            "payments": "/api/payments",
            "sessions": "/api/sessions",
            "health": "/api/health"
        }
    })))
}
