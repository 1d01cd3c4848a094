//! Environment-supplied configuration, read directly via `std::env::var`
//! rather than through a generic config-file layer.

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    NonLocal,
}

impl Environment {
    pub fn is_local(&self) -> bool {
        matches!(self, Environment::Local)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settlement_destination: String,
    pub grant_signator_public_key_hex: String,
    pub grant_wallet_card_id: String,
    pub grant_wallet_public_key_hex: String,
    pub grant_wallet_private_key_hex: String,
    pub environment: Environment,
    pub lower_tx_limit: Decimal,
    pub upper_tx_limit: Decimal,
    pub database_url: String,
    pub ro_database_url: Option<String>,
    pub breaker_error_threshold: u64,
    pub breaker_ttl_seconds: u64,
    pub nominal_currency: String,
    pub uphold_base_url: String,
    pub uphold_access_token: String,
    pub redis_url: Option<String>,
}

fn env_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("missing required env var {name}"))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = match std::env::var("ENVIRONMENT").as_deref() {
            Ok("local") => Environment::Local,
            _ => Environment::NonLocal,
        };

        let lower_tx_limit: Decimal = env_var_opt("LOWER_TX_LIMIT")
            .unwrap_or_else(|| "0.25".to_string())
            .parse()?;
        let upper_tx_limit: Decimal = env_var_opt("UPPER_TX_LIMIT")
            .unwrap_or_else(|| "120".to_string())
            .parse()?;
        let breaker_error_threshold = env_var_opt("BREAKER_ERROR_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let breaker_ttl_seconds = env_var_opt("BREAKER_TTL_SECONDS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let config = Config {
            settlement_destination: env_var("SETTLEMENT_DESTINATION")?,
            grant_signator_public_key_hex: env_var("GRANT_SIGNATOR_PUBLIC_KEY_HEX")?,
            grant_wallet_card_id: env_var_opt("GRANT_WALLET_CARD_ID").unwrap_or_default(),
            grant_wallet_public_key_hex: env_var_opt("GRANT_WALLET_PUBLIC_KEY_HEX")
                .unwrap_or_default(),
            grant_wallet_private_key_hex: env_var_opt("GRANT_WALLET_PRIVATE_KEY_HEX")
                .unwrap_or_default(),
            environment,
            lower_tx_limit,
            upper_tx_limit,
            database_url: env_var("DATABASE_URL")?,
            ro_database_url: env_var_opt("RO_DATABASE_URL"),
            breaker_error_threshold,
            breaker_ttl_seconds,
            nominal_currency: env_var_opt("NOMINAL_CURRENCY").unwrap_or_else(|| "BAT".to_string()),
            uphold_base_url: env_var_opt("UPHOLD_BASE_URL")
                .unwrap_or_else(|| "https://api.uphold.com".to_string()),
            uphold_access_token: env_var_opt("UPHOLD_ACCESS_TOKEN").unwrap_or_default(),
            redis_url: env_var_opt("REDIS_URL"),
        };

        if !environment.is_local() {
            if config.grant_wallet_card_id.is_empty()
                || config.grant_wallet_private_key_hex.is_empty()
            {
                anyhow::bail!("hot wallet credentials are required outside the local environment");
            }
        }

        Ok(config)
    }
}
