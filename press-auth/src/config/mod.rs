use crate::models::SigningAlgorithm;
use press_core::config as core_config;
use press_core::error::AppError;
use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub verification: VerificationConfig,
    pub rate_limit: RateLimitConfig,
    pub roles: RoleConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub janitor_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub algorithm: SigningAlgorithm,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub key_refresh_seconds: u64,
    pub key_grace_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub token_expiry_minutes: i64,
    pub rate_limit: u32,
    pub rate_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub default_role: String,
    pub self_assignable: Vec<String>,
    pub bootstrap_admin_username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// No host means notifications are only logged.
    pub host: Option<String>,
    pub user: String,
    pub password: SecretString,
    pub from: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    /// Development defaults, backed by the in-memory store.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "press-auth".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreConfig {
                backend: StoreBackend::Memory,
                timeout_ms: 2000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/press_auth".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            jwt: JwtConfig {
                issuer: "press-auth".to_string(),
                algorithm: SigningAlgorithm::HS256,
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
                key_refresh_seconds: 60,
                key_grace_minutes: 15,
            },
            verification: VerificationConfig {
                token_expiry_minutes: 30,
                rate_limit: 5,
                rate_window_seconds: 3600,
            },
            rate_limit: RateLimitConfig {
                login_attempts: 5,
                login_window_seconds: 60,
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
            roles: RoleConfig {
                default_role: "user".to_string(),
                self_assignable: vec!["user".to_string()],
                bootstrap_admin_username: None,
            },
            smtp: SmtpConfig {
                host: None,
                user: String::new(),
                password: SecretString::new(String::new()),
                from: "no-reply@localhost".to_string(),
                public_base_url: "http://localhost:8080".to_string(),
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            janitor_interval_seconds: 0,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = AuthConfig::default();

        let backend: StoreBackend = get_env(
            "STORE_BACKEND",
            Some(if is_prod { "postgres" } else { "memory" }),
            false,
        )?
        .parse()
        .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some(&defaults.service_name), false)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(&defaults.service_version),
                false,
            )?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store: StoreConfig {
                backend,
                timeout_ms: parse_env("STORE_TIMEOUT_MS", defaults.store.timeout_ms)?,
            },
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    Some(&defaults.database.url),
                    backend == StoreBackend::Postgres && is_prod,
                )?,
                max_connections: parse_env(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                min_connections: parse_env(
                    "DATABASE_MIN_CONNECTIONS",
                    defaults.database.min_connections,
                )?,
            },
            jwt: JwtConfig {
                issuer: get_env("JWT_ISSUER", Some(&defaults.jwt.issuer), is_prod)?,
                algorithm: parse_env("JWT_ALGORITHM", defaults.jwt.algorithm)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    defaults.jwt.access_token_expiry_minutes,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    defaults.jwt.refresh_token_expiry_days,
                )?,
                key_refresh_seconds: parse_env(
                    "JWT_KEY_REFRESH_SECONDS",
                    defaults.jwt.key_refresh_seconds,
                )?,
                key_grace_minutes: parse_env(
                    "JWT_KEY_GRACE_MINUTES",
                    defaults.jwt.key_grace_minutes,
                )?,
            },
            verification: VerificationConfig {
                token_expiry_minutes: parse_env(
                    "VERIFICATION_TOKEN_EXPIRY_MINUTES",
                    defaults.verification.token_expiry_minutes,
                )?,
                rate_limit: parse_env("VERIFICATION_RATE_LIMIT", defaults.verification.rate_limit)?,
                rate_window_seconds: parse_env(
                    "VERIFICATION_RATE_WINDOW_SECONDS",
                    defaults.verification.rate_window_seconds,
                )?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env(
                    "RATE_LIMIT_LOGIN_ATTEMPTS",
                    defaults.rate_limit.login_attempts,
                )?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    defaults.rate_limit.login_window_seconds,
                )?,
                global_ip_limit: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_LIMIT",
                    defaults.rate_limit.global_ip_limit,
                )?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    defaults.rate_limit.global_ip_window_seconds,
                )?,
            },
            roles: RoleConfig {
                default_role: get_env("DEFAULT_ROLE", Some("user"), false)?,
                self_assignable: split_list(&get_env(
                    "SELF_ASSIGNABLE_ROLES",
                    Some("user"),
                    false,
                )?),
                bootstrap_admin_username: env::var("BOOTSTRAP_ADMIN_USERNAME")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
                user: get_env("SMTP_USER", Some(""), false)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), false)?),
                from: get_env("SMTP_FROM", Some(&defaults.smtp.from), is_prod)?,
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    Some(&defaults.smtp.public_base_url),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
            },
            janitor_interval_seconds: parse_env("JANITOR_INTERVAL_SECONDS", 0)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        // Retired keys must outlive every token they signed.
        if self.jwt.key_grace_minutes < self.jwt.access_token_expiry_minutes {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_KEY_GRACE_MINUTES must be at least JWT_ACCESS_TOKEN_EXPIRY_MINUTES"
            )));
        }

        if self.verification.token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "VERIFICATION_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.verification.rate_limit == 0 || self.verification.rate_window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "VERIFICATION_RATE_LIMIT and VERIFICATION_RATE_WINDOW_SECONDS must be positive"
            )));
        }

        if self.rate_limit.login_attempts == 0 || self.rate_limit.login_window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_LOGIN_ATTEMPTS and RATE_LIMIT_LOGIN_WINDOW_SECONDS must be positive"
            )));
        }

        if self.store.timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_TIMEOUT_MS must be positive"
            )));
        }

        if !self
            .roles
            .self_assignable
            .iter()
            .any(|r| r == &self.roles.default_role)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_ROLE must be listed in SELF_ASSIGNABLE_ROLES"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.store.backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND=memory is not allowed in production"
                )));
            }

            if self.roles.self_assignable.iter().any(|r| r == "admin") {
                tracing::error!("SELF_ASSIGNABLE_ROLES includes admin - anyone can self-register as administrator");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
