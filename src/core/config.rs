//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.

use crate::core::auth::jwt::JwtConfig;
use crate::core::auth::password::DEFAULT_BCRYPT_COST;
use crate::core::db::DbConfig;

/// Signing secret used outside production when `JWT_SECRET` is unset
const DEV_JWT_SECRET: &str = "storefront-dev-secret-do-not-use-in-production";

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Deployment environment, from `APP_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "production" || v == "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set in production")]
    MissingJwtSecret,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,

    /// PostgreSQL settings; `None` runs on the in-memory store
    pub database: Option<DbConfig>,

    pub jwt: JwtConfig,

    /// True when the signing secret is the built-in development one
    pub using_dev_secret: bool,

    /// Listen address, e.g. `0.0.0.0:3000`
    pub bind_address: String,

    pub bcrypt_cost: u32,

    /// Bump the token version when a password reset completes
    pub revoke_sessions_on_password_reset: bool,

    /// Allowed browser origin for CORS; unset means same-origin only
    pub cors_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = Environment::parse(get("APP_ENV").as_deref());

        let (secret, using_dev_secret) = match get("JWT_SECRET") {
            Some(secret) => (secret, false),
            None if environment.is_production() => return Err(ConfigError::MissingJwtSecret),
            None => (DEV_JWT_SECRET.to_string(), true),
        };

        let mut jwt = JwtConfig::new(secret);
        if let Some(minutes) = parse(&get, "JWT_ACCESS_EXPIRATION_MINUTES")? {
            jwt = jwt.access_token_expiration(minutes);
        }
        if let Some(days) = parse(&get, "JWT_REFRESH_EXPIRATION_DAYS")? {
            jwt = jwt.refresh_token_expiration(days);
        }
        if let Some(issuer) = get("JWT_ISSUER") {
            jwt = jwt.issuer(issuer);
        }

        let database = match get("DATABASE_URL") {
            Some(url) => {
                let mut db = DbConfig::new(url);
                if let Some(max) = parse(&get, "DB_MAX_CONNECTIONS")? {
                    db = db.max_connections(max);
                }
                Some(db)
            }
            None => None,
        };

        let bcrypt_cost = parse(&get, "BCRYPT_COST")?.unwrap_or(DEFAULT_BCRYPT_COST);
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let revoke_sessions_on_password_reset =
            parse_flag(&get, "REVOKE_SESSIONS_ON_PASSWORD_RESET")?.unwrap_or(false);

        Ok(Self {
            environment,
            database,
            jwt,
            using_dev_secret,
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            bcrypt_cost,
            revoke_sessions_on_password_reset,
            cors_origin: get("CORS_ORIGIN"),
        })
    }

    /// Check if database is configured
    pub fn has_database(&self) -> bool {
        self.database.is_some()
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}

fn parse_flag<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value }),
        })
        .transpose()
}
