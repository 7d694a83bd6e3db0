use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Where sessions, pending submissions and the catalog live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// MongoDB for catalog and sessions, Redis for pending submissions.
    Mongo,
    /// In-process stores, lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = config::ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown storage backend '{}', expected 'mongo' or 'memory'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    /// Extra time after the test duration during which submissions are accepted.
    pub submission_grace_seconds: u64,
    /// How long a pending submission outlives the session window.
    pub pending_slack_seconds: u64,
    pub expiry_sweep_interval_secs: u64,
    pub broadcast_capacity: usize,
    pub catalog_seed_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "quizer".to_string(),
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            storage_backend: StorageBackend::Mongo,
            submission_grace_seconds: 30,
            pending_slack_seconds: 60,
            expiry_sweep_interval_secs: 15,
            broadcast_capacity: 256,
            catalog_seed_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let lookup = |key: &str, legacy: &str| -> Option<String> {
            settings
                .get_string(key)
                .ok()
                .or_else(|| env::var(legacy).ok())
                .filter(|value| !value.is_empty())
        };

        let mongo_uri = lookup("database.mongo_uri", "MONGO_URI").unwrap_or_else(|| {
            match (env::var("MONGO_USER"), env::var("MONGO_PASSWORD")) {
                (Ok(user), Ok(password)) => {
                    eprintln!("WARNING: Building MongoDB URI from MONGO_USER/MONGO_PASSWORD env vars");
                    format!(
                        "mongodb://{}:{}@localhost:27017/?authSource=admin",
                        user, password
                    )
                }
                _ => defaults.mongo_uri.clone(),
            }
        });

        let redis_uri = lookup("redis.uri", "REDIS_URI").unwrap_or_else(|| {
            let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
            match env::var("REDIS_PASSWORD") {
                Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                Err(_) => format!("redis://{}:{}/0", host, port),
            }
        });

        let mongo_database = lookup("database.mongo_database", "MONGO_DATABASE")
            .unwrap_or(defaults.mongo_database);

        let jwt_secret = match lookup("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret
            }
        };

        let bind_addr = lookup("server.bind_addr", "BIND_ADDR").unwrap_or(defaults.bind_addr);

        let storage_backend = lookup("storage.backend", "STORAGE_BACKEND")
            .map(|value| value.parse::<StorageBackend>())
            .transpose()?
            .unwrap_or(defaults.storage_backend);

        let number = |key: &str, legacy: &str, default: u64| -> Result<u64, config::ConfigError> {
            match lookup(key, legacy) {
                Some(raw) => raw.trim().parse::<u64>().map_err(|err| {
                    config::ConfigError::Message(format!("invalid value for {}: {}", key, err))
                }),
                None => Ok(default),
            }
        };

        let submission_grace_seconds = number(
            "sessions.submission_grace_seconds",
            "SUBMISSION_GRACE_SECONDS",
            defaults.submission_grace_seconds,
        )?;
        let pending_slack_seconds = number(
            "sessions.pending_slack_seconds",
            "PENDING_SLACK_SECONDS",
            defaults.pending_slack_seconds,
        )?;
        let expiry_sweep_interval_secs = number(
            "sessions.expiry_sweep_interval_secs",
            "EXPIRY_SWEEP_INTERVAL_SECS",
            defaults.expiry_sweep_interval_secs,
        )?;
        let broadcast_capacity = number(
            "broadcast.capacity",
            "BROADCAST_CAPACITY",
            defaults.broadcast_capacity as u64,
        )? as usize;

        let catalog_seed_path = lookup("catalog.seed_path", "CATALOG_SEED_PATH");

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            storage_backend,
            submission_grace_seconds,
            pending_slack_seconds,
            expiry_sweep_interval_secs,
            broadcast_capacity,
            catalog_seed_path,
        })
    }
}
