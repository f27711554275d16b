use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("JWT_SECRET must be at least 32 characters in production")]
    WeakSecret,
    #[error("push credential file not found at {0} (required in production)")]
    MissingPushCredentials(PathBuf),
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Immutable configuration snapshot, loaded once at startup and wired into
/// the composition root (`AppState`). There is no ambient mutable process
/// state beyond this struct.
#[derive(Clone, Debug)]
pub struct Config {
    pub is_dev: bool,

    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    /// Fraction of `db_max_connections` in use before admission rejects new
    /// requests with `POOL_EXHAUSTED` (§4.9).
    pub db_pool_admission_threshold: f64,

    pub redis_url: String,
    /// Timeout for the periodic KV health-check ping (§4.1).
    pub kv_health_check_timeout: Duration,
    pub kv_health_check_interval: Duration,

    pub jwt_secret: Arc<str>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub jwt_audience: String,

    /// Failed-login lockout policy (§4.3, §3 Failed-Login Counter).
    pub lockout_threshold: u32,
    pub lockout_window: Duration,
    pub lockout_duration: Duration,

    pub password_reset_token_ttl: Duration,

    pub server_host: String,
    pub server_port: u16,
    pub request_timeout: Duration,

    pub allowed_origins: Vec<String>,
    pub ws_origin_allowlist: Vec<String>,

    pub chat_max_connections: usize,
    pub signaling_max_connections: usize,
    pub ws_ping_interval: Duration,
    pub ws_pong_wait: Duration,
    pub ws_broadcast_buffer: usize,
    pub ws_out_channel_buffer: usize,

    pub max_call_participants: usize,

    pub upload_dir: PathBuf,
    pub presigned_url_ttl: Duration,

    pub push_credentials_path: Option<PathBuf>,
    pub push_provider_endpoint: String,

    pub turn_secret: Arc<str>,
    pub turn_urls: Vec<String>,
    pub turn_credential_ttl: Duration,

    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET".into()))?;
        if !is_dev && jwt_secret.len() < 32 {
            return Err(ConfigError::WeakSecret);
        }

        let push_credentials_path = env::var("PUSH_CREDENTIALS_PATH").ok().map(PathBuf::from);
        if !is_dev {
            match &push_credentials_path {
                Some(path) if path.exists() => {}
                Some(path) => return Err(ConfigError::MissingPushCredentials(path.clone())),
                None => {
                    return Err(ConfigError::MissingVar("PUSH_CREDENTIALS_PATH".into()));
                }
            }
        }

        let turn_secret = env::var("TURN_SECRET").unwrap_or_else(|_| {
            if is_dev {
                "dev-turn-secret-change-in-production".to_string()
            } else {
                String::new()
            }
        });
        if !is_dev && turn_secret.is_empty() {
            return Err(ConfigError::MissingVar("TURN_SECRET".into()));
        }

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".into()))?;

        Ok(Config {
            is_dev,

            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 20),
            db_acquire_timeout: Duration::from_secs(env_parse("DB_ACQUIRE_TIMEOUT_SECS", 5)),
            db_pool_admission_threshold: env_parse("DB_POOL_ADMISSION_THRESHOLD", 0.8),

            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            kv_health_check_timeout: Duration::from_secs(env_parse("KV_HEALTH_CHECK_TIMEOUT_SECS", 2)),
            kv_health_check_interval: Duration::from_secs(env_parse(
                "KV_HEALTH_CHECK_INTERVAL_SECS",
                30,
            )),

            jwt_secret: Arc::from(jwt_secret.as_str()),
            access_token_ttl: Duration::from_secs(env_parse("ACCESS_TOKEN_TTL_SECS", 15 * 60)),
            refresh_token_ttl: Duration::from_secs(env_parse(
                "REFRESH_TOKEN_TTL_SECS",
                30 * 24 * 60 * 60,
            )),
            jwt_audience: env_or("JWT_AUDIENCE", "meridian-clients"),

            lockout_threshold: env_parse("LOCKOUT_THRESHOLD", 5),
            lockout_window: Duration::from_secs(env_parse("LOCKOUT_WINDOW_SECS", 15 * 60)),
            lockout_duration: Duration::from_secs(env_parse("LOCKOUT_DURATION_SECS", 15 * 60)),

            password_reset_token_ttl: Duration::from_secs(env_parse(
                "PASSWORD_RESET_TOKEN_TTL_SECS",
                60 * 60,
            )),

            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_parse("SERVER_PORT", 8080),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30)),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            ws_origin_allowlist: env::var("WS_ORIGIN_ALLOWLIST")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),

            chat_max_connections: env_parse("CHAT_MAX_CONNECTIONS", 10_000),
            signaling_max_connections: env_parse("SIGNALING_MAX_CONNECTIONS", 1_000),
            ws_ping_interval: Duration::from_secs(env_parse("WS_PING_INTERVAL_SECS", 30)),
            ws_pong_wait: Duration::from_secs(env_parse("WS_PONG_WAIT_SECS", 60)),
            ws_broadcast_buffer: env_parse("WS_BROADCAST_BUFFER", 256),
            ws_out_channel_buffer: env_parse("WS_OUT_CHANNEL_BUFFER", 256),

            max_call_participants: env_parse("MAX_CALL_PARTICIPANTS", 4),

            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "./uploads")),
            presigned_url_ttl: Duration::from_secs(env_parse("PRESIGNED_URL_TTL_SECS", 15 * 60)),

            push_credentials_path,
            push_provider_endpoint: env_or(
                "PUSH_PROVIDER_ENDPOINT",
                "https://push.example.invalid/v1/send",
            ),

            turn_secret: Arc::from(turn_secret.as_str()),
            turn_urls: env::var("TURN_URLS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["turn:turn.example.invalid:3478".to_string()]),
            turn_credential_ttl: Duration::from_secs(env_parse("TURN_CREDENTIAL_TTL_SECS", 3600)),

            circuit_breaker_threshold: env_parse("CIRCUIT_BREAKER_THRESHOLD", 5),
            circuit_breaker_reset_timeout: Duration::from_secs(env_parse(
                "CIRCUIT_BREAKER_RESET_TIMEOUT_SECS",
                30,
            )),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 200)),
            retry_max_delay: Duration::from_secs(env_parse("RETRY_MAX_DELAY_SECS", 30)),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
