use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use meridian_core::calls::CallOrchestrator;
use meridian_core::chat::{ChatAdmission, ChatHub};
use meridian_core::config::Config;
use meridian_core::db;
use meridian_core::handlers;
use meridian_core::message_store::{MessageStore, PostgresMessageStore};
use meridian_core::openapi::ApiDoc;
use meridian_core::presence::PresenceTracker;
use meridian_core::push::{LivePushProvider, PushDispatcher, PushProvider};
use meridian_core::rate_limit::RateLimiter;
use meridian_core::resilience::kv::KvClient;
use meridian_core::resilience::pool_admission::{pool_admission, PoolAdmissionConfig};
use meridian_core::resilience::timeout;
use meridian_core::resilience::ResilienceConfig;
use meridian_core::session::SessionStore;
use meridian_core::signaling::{SignalingAdmission, SignalingHub};
use meridian_core::state::AppState;
use meridian_core::storage::{BlobStore, LocalBlobStore};
use meridian_core::{chat, signaling};

/// Restricts `/metrics` to loopback connections, matching the teacher's
/// approach of never exposing Prometheus scrape endpoints publicly.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meridian_core=info,tower_http=info,sqlx=warn".parse().unwrap());

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("meridian server starting");

    let config = Config::from_env().expect("failed to load configuration");
    info!("configuration loaded");

    let pool = db::create_pool(&config).await.expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");
    info!("database migrations applied");

    db::health_check(&pool).await.expect("database health check failed");
    info!("database health check passed");

    let kv = KvClient::connect(&config.redis_url, config.kv_health_check_timeout)
        .await
        .expect("failed to connect to kv store");
    let _kv_health_task = kv.spawn_periodic_health_check(config.kv_health_check_interval);
    info!("kv client connected");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("failed to create upload directory");
    info!(dir = %config.upload_dir.display(), "upload directory ready");

    let resilience_config = ResilienceConfig::from_config(&config);
    let breaker = resilience_config.new_breaker();
    let retry = resilience_config.retry_policy;

    let sessions = SessionStore::new(pool.clone(), kv.clone(), breaker.clone(), retry);
    let rate_limiter = Arc::new(RateLimiter::new(kv.clone()));
    let presence = PresenceTracker::new(kv.clone());
    let messages: Arc<dyn MessageStore> = Arc::new(PostgresMessageStore::new(pool.clone()));

    let base_url = format!("http://{}", config.server_addr());
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(config.upload_dir.clone(), base_url));

    let push_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build push http client");
    let push_provider: Arc<dyn PushProvider> =
        Arc::new(LivePushProvider::new(push_client, config.push_provider_endpoint.clone()));
    let push = Arc::new(PushDispatcher::new(push_provider, breaker.clone(), retry));

    let chat_hub = ChatHub::spawn(kv.clone(), config.ws_broadcast_buffer);
    let signaling_hub = SignalingHub::spawn(kv.clone(), config.ws_broadcast_buffer);
    let calls = Arc::new(CallOrchestrator::new(
        pool.clone(),
        config.max_call_participants,
        config.turn_secret.clone(),
        config.turn_urls.clone(),
        config.turn_credential_ttl,
    ));

    let pool_admission_config = PoolAdmissionConfig {
        threshold: config.db_pool_admission_threshold,
    };
    let request_timeout = config.request_timeout;

    let app_state = AppState {
        pool: pool.clone(),
        kv,
        config: Arc::new(config.clone()),
        breaker,
        retry,
        sessions,
        rate_limiter,
        presence,
        messages,
        blobs,
        push,
        chat_hub,
        chat_admission: ChatAdmission::default(),
        signaling_hub,
        signaling_admission: SignalingAdmission::default(),
        calls,
        pool_admission_config,
    };

    let cors = if config.is_dev {
        info!("cors: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config.allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        if origins.is_empty() {
            tracing::warn!("cors: no ALLOWED_ORIGINS configured, all cross-origin requests will be denied");
        } else {
            info!(origins = ?config.allowed_origins, "cors: production mode");
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() }).route_layer(middleware::from_fn(require_loopback)),
        )
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/validate", get(handlers::auth::validate))
        .route("/auth/password-reset", post(handlers::auth::request_password_reset))
        .route(
            "/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .route("/users/@me", get(handlers::users::get_current_user))
        .route("/users/:id", get(handlers::users::get_user_by_id))
        .route("/push-tokens", post(handlers::push_tokens::register_push_token))
        .route("/push-tokens/:id", delete(handlers::push_tokens::delete_push_token))
        .route("/conversations", post(handlers::conversations::create_conversation))
        .route("/conversations", get(handlers::conversations::list_my_conversations))
        .route("/conversations/:id", get(handlers::conversations::get_conversation))
        .route("/conversations/:id/leave", post(handlers::conversations::leave_conversation))
        .route(
            "/conversations/:id/participants",
            get(handlers::conversations::list_participants),
        )
        .route(
            "/conversations/:id/participants/:user_id",
            post(handlers::conversations::add_participant),
        )
        .route("/conversations/:id/messages", post(handlers::messages::send_message))
        .route("/conversations/:id/messages", get(handlers::messages::list_messages))
        .route(
            "/conversations/:id/messages/:message_id",
            patch(handlers::messages::edit_message),
        )
        .route(
            "/conversations/:id/messages/:message_id",
            delete(handlers::messages::delete_message),
        )
        .route("/calls", post(handlers::calls::initiate_call))
        .route("/calls/:id/join", post(handlers::calls::join_call))
        .route("/calls/:id/leave", post(handlers::calls::leave_call))
        .route("/calls/:id/end", post(handlers::calls::end_call))
        .route("/calls/ice-servers", get(handlers::calls::ice_servers))
        .route("/uploads", post(handlers::storage::issue_upload_url))
        .route("/uploads/:id/confirm", post(handlers::storage::confirm_upload))
        .route("/files/:id/download-url", get(handlers::storage::issue_download_url))
        .route("/ws/chat", get(chat::chat_ws_handler))
        .route("/ws/signaling", get(signaling::signaling_ws_handler))
        .layer(middleware::from_fn(timeout::layer(request_timeout)))
        .route_layer(middleware::from_fn(pool_admission))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    let addr = config.server_addr();
    info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind to address");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server failed to start");
}
