use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use url::Url;

use crate::domain::receipts::BookingFeeTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // JWT auth
    pub jwt_jwks_url: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwks_cache_ttl_seconds: u64,

    // Receipt storage
    pub receipt_upload_dir: String,
    pub receipt_public_base_url: Url,
    pub receipt_max_bytes: usize,

    // Booking fees
    pub booking_fees: BookingFeeTable,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // JWT auth
        let jwt_jwks_url = env::var("JWT_JWKS_URL").context("JWT_JWKS_URL must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").context("JWT_ISSUER must be set")?;
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string());
        let jwks_cache_ttl_seconds = env::var("JWKS_CACHE_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1800); // 30 minutes default

        // Receipt storage
        let receipt_upload_dir =
            env::var("RECEIPT_UPLOAD_DIR").unwrap_or_else(|_| "./storage/receipts".to_string());
        let receipt_public_base_url = env::var("RECEIPT_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/storage/".to_string());
        let receipt_public_base_url =
            Url::parse(&receipt_public_base_url).context("RECEIPT_PUBLIC_BASE_URL is not a URL")?;
        let receipt_max_bytes = env::var("RECEIPT_MAX_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5 * 1024 * 1024);

        // Booking fees
        let booking_fees = BookingFeeTable::new(
            fee_from_env("BOOKING_FEE_SIMPLE", "10.00")?,
            fee_from_env("BOOKING_FEE_STANDARD", "20.00")?,
            fee_from_env("BOOKING_FEE_COMPLEX", "40.00")?,
        );

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            redis_url,
            cors_allow_origins,
            jwt_jwks_url,
            jwt_issuer,
            jwt_audience,
            jwks_cache_ttl_seconds,
            receipt_upload_dir,
            receipt_public_base_url,
            receipt_max_bytes,
            booking_fees,
        })
    }
}

fn fee_from_env(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_fee(&raw).with_context(|| format!("{} is not a valid fee amount", key))
}

fn parse_fee(raw: &str) -> Result<Decimal> {
    let fee = Decimal::from_str(raw.trim())?;
    if fee.is_sign_negative() {
        bail!("fee must not be negative");
    }
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_falls_back_to_dev() {
        assert_eq!(Environment::from_str("production"), Environment::Prod);
        assert_eq!(Environment::from_str("STAGING"), Environment::Staging);
        assert_eq!(Environment::from_str("local"), Environment::Dev);
    }

    #[test]
    fn fee_parsing_rejects_negative_and_garbage() {
        assert_eq!(parse_fee(" 12.50 ").unwrap(), Decimal::new(1250, 2));
        assert!(parse_fee("-1").is_err());
        assert!(parse_fee("ten").is_err());
    }
}
