use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{TenantId, UserId};

const MIN_PROD_SECRET_LEN: usize = 32;
/// One year. Longer lifetimes overflow timestamp arithmetic.
const MAX_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub redis: RedisConfig,
    pub mongodb: MongoConfig,
    pub jwt: JwtConfig,
    pub system: SystemIds,
    pub store_retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub access_prefix: String,
    pub refresh_prefix: String,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl JwtConfig {
    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_ttl_seconds)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_token_ttl_seconds)
    }
}

/// Identifiers of the platform's own tenant and its bootstrap administrator.
/// Fixed at startup and handed to the components that need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIds {
    pub system_tenant_id: TenantId,
    pub system_admin_user_id: UserId,
}

impl SystemIds {
    pub fn is_system_tenant(&self, tenant_id: &TenantId) -> bool {
        &self.system_tenant_id == tenant_id
    }

    pub fn is_system_admin(&self, tenant_id: &TenantId, user_id: &UserId) -> bool {
        self.is_system_tenant(tenant_id) && &self.system_admin_user_id == user_id
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build from any key/value source. `lookup` returns `None` for unset keys.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let get = |key: &str, default: Option<&str>| get_env(&lookup, key, default, is_prod);

        let config = AuthConfig {
            common,
            environment,
            redis: RedisConfig {
                url: get("REDIS_URL", Some("redis://127.0.0.1:6379"))?,
                access_prefix: get("REDIS_ACCESS_PREFIX", Some("tokens"))?,
                refresh_prefix: get("REDIS_REFRESH_PREFIX", Some("refresh_tokens"))?,
            },
            mongodb: MongoConfig {
                uri: get("MONGODB_URI", Some("mongodb://127.0.0.1:27017"))?,
                database: get("MONGODB_DATABASE", Some("tenant_auth"))?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get("JWT_SECRET", None)?),
                issuer: get("JWT_ISSUER", Some("tenant-auth"))?,
                access_token_ttl_seconds: parse(
                    "ACCESS_TOKEN_TTL_SECONDS",
                    get("ACCESS_TOKEN_TTL_SECONDS", Some("900"))?,
                )?,
                refresh_token_ttl_seconds: parse(
                    "REFRESH_TOKEN_TTL_SECONDS",
                    get("REFRESH_TOKEN_TTL_SECONDS", Some("604800"))?,
                )?,
            },
            system: SystemIds {
                system_tenant_id: TenantId::parse(get("SYSTEM_TENANT_ID", Some("system"))?)
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
                system_admin_user_id: UserId::parse(get(
                    "SYSTEM_ADMIN_USER_ID",
                    Some("system-admin"),
                )?)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            store_retry: RetryConfig {
                max_retries: parse("STORE_MAX_RETRIES", get("STORE_MAX_RETRIES", Some("2"))?)?,
                initial_backoff: Duration::from_millis(parse(
                    "STORE_RETRY_BACKOFF_MS",
                    get("STORE_RETRY_BACKOFF_MS", Some("50"))?,
                )?),
                ..RetryConfig::quick()
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.jwt.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.jwt.refresh_token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_SECONDS must be at most {}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if self.jwt.refresh_token_ttl_seconds <= self.jwt.access_token_ttl_seconds {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_SECONDS must be greater than ACCESS_TOKEN_TTL_SECONDS"
            )));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.redis.access_prefix == self.redis.refresh_prefix {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REDIS_ACCESS_PREFIX and REDIS_REFRESH_PREFIX must differ"
            )));
        }

        if self.environment == Environment::Prod
            && self.jwt.secret.expose_secret().len() < MIN_PROD_SECRET_LEN
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least {} bytes in production",
                MIN_PROD_SECRET_LEN
            )));
        }

        Ok(())
    }
}

fn get_env<F>(lookup: &F, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse<T>(key: &str, raw: String) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AuthConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(core_config::Config::default(), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_dev_defaults() {
        let config = load(&[("JWT_SECRET", "dev-secret")]).unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.jwt.access_token_ttl_seconds, 900);
        assert_eq!(config.jwt.refresh_token_ttl_seconds, 604_800);
        assert_eq!(config.redis.access_prefix, "tokens");
        assert_eq!(config.redis.refresh_prefix, "refresh_tokens");
        assert_eq!(config.system.system_tenant_id.as_str(), "system");
    }

    #[test]
    fn test_secret_is_always_required() {
        assert!(matches!(load(&[]), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_prod_requires_every_key() {
        let err = load(&[
            ("ENVIRONMENT", "prod"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("required in production"));
    }

    #[test]
    fn test_prod_rejects_short_secret() {
        let vars = [
            ("ENVIRONMENT", "prod"),
            ("REDIS_URL", "redis://cache:6379"),
            ("REDIS_ACCESS_PREFIX", "tokens"),
            ("REDIS_REFRESH_PREFIX", "refresh_tokens"),
            ("MONGODB_URI", "mongodb://db:27017"),
            ("MONGODB_DATABASE", "erp"),
            ("JWT_SECRET", "short"),
            ("JWT_ISSUER", "tenant-auth"),
            ("ACCESS_TOKEN_TTL_SECONDS", "900"),
            ("REFRESH_TOKEN_TTL_SECONDS", "604800"),
            ("SYSTEM_TENANT_ID", "system"),
            ("SYSTEM_ADMIN_USER_ID", "root"),
            ("STORE_MAX_RETRIES", "2"),
            ("STORE_RETRY_BACKOFF_MS", "50"),
        ];
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_refresh_ttl_must_exceed_access_ttl() {
        let err = load(&[
            ("JWT_SECRET", "dev-secret"),
            ("ACCESS_TOKEN_TTL_SECONDS", "600"),
            ("REFRESH_TOKEN_TTL_SECONDS", "600"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("REFRESH_TOKEN_TTL_SECONDS"));
    }

    #[test]
    fn test_huge_ttl_is_rejected_instead_of_overflowing() {
        let err = load(&[
            ("JWT_SECRET", "dev-secret"),
            ("REFRESH_TOKEN_TTL_SECONDS", "9223372036854775807"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("at most"));

        let err = load(&[
            ("JWT_SECRET", "dev-secret"),
            ("ACCESS_TOKEN_TTL_SECONDS", "31536001"),
            ("REFRESH_TOKEN_TTL_SECONDS", "31536000"),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let config = load(&[
            ("JWT_SECRET", "dev-secret"),
            ("REFRESH_TOKEN_TTL_SECONDS", "31536000"),
        ])
        .unwrap();
        assert_eq!(config.jwt.refresh_ttl(), chrono::Duration::days(365));
    }

    #[test]
    fn test_invalid_system_tenant_is_rejected() {
        assert!(load(&[("JWT_SECRET", "dev-secret"), ("SYSTEM_TENANT_ID", "sys:tem")]).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
