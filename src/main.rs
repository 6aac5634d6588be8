use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fer_site_api::config;
use fer_site_api::handlers;
use fer_site_api::middleware::{activity, auth};
use fer_site_api::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fer_site_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::load_config_with_fallback();

    let state = match AppState::from_config(config.clone()).await {
        Ok(state) => {
            tracing::info!("✓ Storage backend initialized");
            state
        }
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    // Public routes
    let public = Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/contact", post(handlers::contact::submit_contact))
        .route("/api/newsletter", post(handlers::newsletter::subscribe));

    // Logout needs the caller's identity but is not activity-tracked
    let session = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Authenticated routes; every request here counts as account activity
    let tracked = Router::new()
        .route(
            "/api/users/profile",
            get(handlers::user::get_profile).put(handlers::user::update_profile),
        )
        .route("/api/emotion/recognize", post(handlers::emotion::recognize))
        .route("/api/emotions/record", post(handlers::emotion::record_emotion))
        .route("/api/emotions/stats", get(handlers::emotion::stats))
        .route("/api/emotions/recent", get(handlers::emotion::recent))
        .route(
            "/api/emotions/image-analysis",
            post(handlers::emotion::save_image_analysis),
        )
        .route(
            "/api/emotions/image-analyses",
            get(handlers::emotion::list_image_analyses),
        )
        .route(
            "/api/emotions/image-analyses/stats",
            get(handlers::emotion::image_analysis_stats),
        )
        .route(
            "/api/emotions/image-analyses/:id",
            delete(handlers::emotion::delete_image_analysis),
        )
        .layer(from_fn_with_state(state.clone(), activity::track_activity))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Admin routes require authentication and the admin role
    let admin = Router::new()
        .route("/api/admin/stats", get(handlers::admin::dashboard_stats))
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route("/api/admin/users/:id", get(handlers::admin::get_user))
        .route(
            "/api/admin/users/:id/emotions",
            get(handlers::admin::user_emotions),
        )
        .route(
            "/api/admin/users/:id/image-analyses",
            get(handlers::admin::user_image_analyses),
        )
        .route("/api/admin/contacts", get(handlers::admin::list_contacts))
        .route(
            "/api/admin/contacts/:id/read",
            put(handlers::admin::mark_contact_read),
        )
        .route(
            "/api/admin/newsletters",
            get(handlers::admin::list_newsletters),
        )
        .layer(from_fn(auth::require_admin))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Add global middleware
    let app = public
        .merge(session)
        .merge(tracked)
        .merge(admin)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Run the server
    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    );
    tracing::info!("🚀 Starting FER site API server on {}", addr);
    tracing::info!("📡 API available at http://{}/api", addr);
    tracing::info!("📖 Admin routes: /api/admin/*");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
