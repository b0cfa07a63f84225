use std::env;
use std::time::Duration;

use alloy::primitives::Address;
use url::Url;

const DEFAULT_UPSTREAM_RPC_URL: &str = "https://sepolia.base.org";
const DEFAULT_SETTLEMENT_RPC_URL: &str = "https://sepolia.base.org";
// Base Sepolia USDC.
const DEFAULT_USDC_ADDRESS: &str = "0x036CbD53842c5426634E7929541eC2318f3dCF7e";
const DEFAULT_NETWORK: &str = "eip155:84532";
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";
const DEFAULT_PRICE_PER_REQUEST: i64 = 100;
const DEFAULT_MAX_AMOUNT_REQUIRED: i64 = 10_000;
const DEFAULT_TOKEN_EXPIRY_HOURS: u64 = 168;
const DEFAULT_PORT: u16 = 8080;

/// Gateway configuration, loaded from environment variables.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Upstream JSON-RPC endpoint to proxy to.
    pub upstream_rpc_url: String,
    /// The gateway's stablecoin receiving address. Zero when payments are
    /// disabled.
    pub gateway_pay_to: Address,
    /// Stablecoin contract on the target network.
    pub usdc_address: Address,
    /// EIP-712 domain name of the stablecoin contract.
    pub usdc_domain_name: String,
    /// EIP-712 domain version of the stablecoin contract.
    pub usdc_domain_version: String,
    /// Public URL of this gateway, used in the x402 resource field.
    pub gateway_url: String,
    /// Remote facilitator endpoint. Empty disables the remote mode.
    pub facilitator_url: Option<String>,
    /// Relayer private key for the local facilitator. The derived address
    /// pays gas for settlement transactions.
    pub gateway_private_key: Option<String>,
    /// JSON-RPC endpoint of the settlement chain (local facilitator).
    pub settlement_rpc_url: String,
    /// CAIP-2 network identifier.
    pub network: String,
    /// Cost per RPC call in stablecoin atomic units.
    pub price_per_request: i64,
    /// Total payment amount advertised in the 402 response.
    pub max_amount_required: i64,
    /// HMAC-SHA256 key for batch tokens. Empty when payments are disabled.
    pub jwt_secret: Vec<u8>,
    /// How long issued batch tokens remain valid.
    pub token_expiry: Duration,
    /// HTTP listen port.
    pub port: u16,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("upstream_rpc_url", &self.upstream_rpc_url)
            .field("gateway_pay_to", &self.gateway_pay_to)
            .field("usdc_address", &self.usdc_address)
            .field("usdc_domain_name", &self.usdc_domain_name)
            .field("usdc_domain_version", &self.usdc_domain_version)
            .field("gateway_url", &self.gateway_url)
            .field("facilitator_url", &self.facilitator_url)
            .field(
                "gateway_private_key",
                &self.gateway_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("settlement_rpc_url", &self.settlement_rpc_url)
            .field("network", &self.network)
            .field("price_per_request", &self.price_per_request)
            .field("max_amount_required", &self.max_amount_required)
            .field(
                "jwt_secret",
                &if self.jwt_secret.is_empty() {
                    "[unset]"
                } else {
                    "[REDACTED]"
                },
            )
            .field("token_expiry", &self.token_expiry)
            .field("port", &self.port)
            .finish()
    }
}

impl GatewayConfig {
    /// Read configuration from the environment. Payment-related variables are
    /// only required when a facilitator mode (remote or local) is enabled.
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_rpc_url = env_or("UPSTREAM_RPC_URL", DEFAULT_UPSTREAM_RPC_URL);
        Url::parse(&upstream_rpc_url)
            .map_err(|e| ConfigError::InvalidUrl("UPSTREAM_RPC_URL", e.to_string()))?;

        let usdc_raw = env_or("USDC_ADDRESS", DEFAULT_USDC_ADDRESS);
        let usdc_address: Address = usdc_raw
            .parse()
            .map_err(|_| ConfigError::InvalidAddress("USDC_ADDRESS"))?;

        let facilitator_url = non_empty(env_or("FACILITATOR_URL", ""));
        if let Some(ref url) = facilitator_url {
            Url::parse(url).map_err(|e| ConfigError::InvalidUrl("FACILITATOR_URL", e.to_string()))?;
        }
        let gateway_private_key = non_empty(env_or("GATEWAY_PRIVATE_KEY", ""));
        let payments_enabled = facilitator_url.is_some() || gateway_private_key.is_some();

        let pay_to_raw = env_or("GATEWAY_PAY_TO", "");
        let gateway_pay_to: Address = if pay_to_raw.is_empty() {
            Address::ZERO
        } else {
            pay_to_raw
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("GATEWAY_PAY_TO"))?
        };

        let price_per_request = env_i64("PRICE_PER_REQUEST", DEFAULT_PRICE_PER_REQUEST);
        let max_amount_required = env_i64("MAX_AMOUNT_REQUIRED", DEFAULT_MAX_AMOUNT_REQUIRED);

        // Every payment mode needs the token key and receiving address, the
        // local mode included: tokens are issued on settlement either way.
        let jwt_secret = if payments_enabled {
            let raw =
                env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired("JWT_SECRET"))?;
            let secret = alloy::hex::decode(raw.trim_start_matches("0x"))
                .map_err(|_| ConfigError::InvalidSecret("JWT_SECRET must be valid hex"))?;
            if secret.len() < 32 {
                return Err(ConfigError::InvalidSecret(
                    "JWT_SECRET must be at least 32 bytes (64 hex chars)",
                ));
            }
            secret
        } else {
            Vec::new()
        };

        if payments_enabled {
            if gateway_pay_to == Address::ZERO {
                return Err(ConfigError::MissingRequired("GATEWAY_PAY_TO"));
            }
            if price_per_request <= 0 {
                return Err(ConfigError::InvalidPricing(
                    "PRICE_PER_REQUEST must be positive",
                ));
            }
            if max_amount_required < price_per_request {
                return Err(ConfigError::InvalidPricing(
                    "MAX_AMOUNT_REQUIRED must be >= PRICE_PER_REQUEST",
                ));
            }
        }

        let expiry_hours = env_u64("TOKEN_EXPIRY_HOURS", DEFAULT_TOKEN_EXPIRY_HOURS);

        Ok(Self {
            upstream_rpc_url,
            gateway_pay_to,
            usdc_address,
            usdc_domain_name: env_or("USDC_DOMAIN_NAME", "USDC"),
            usdc_domain_version: env_or("USDC_DOMAIN_VERSION", "2"),
            gateway_url: env_or("GATEWAY_URL", DEFAULT_GATEWAY_URL),
            facilitator_url,
            gateway_private_key,
            settlement_rpc_url: env_or("SETTLEMENT_RPC_URL", DEFAULT_SETTLEMENT_RPC_URL),
            network: env_or("NETWORK", DEFAULT_NETWORK),
            price_per_request,
            max_amount_required,
            jwt_secret,
            token_expiry: Duration::from_secs(expiry_hours.saturating_mul(3600)),
            port: env_u64("PORT", u64::from(DEFAULT_PORT)) as u16,
        })
    }

    /// Number of RPC credits issued per payment.
    pub fn requests_per_payment(&self) -> i64 {
        self.max_amount_required / self.price_per_request
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_i64(key: &str, fallback: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address in {0}")]
    InvalidAddress(&'static str),

    #[error("invalid URL in {0}: {1}")]
    InvalidUrl(&'static str, String),

    #[error("{0}")]
    InvalidSecret(&'static str),

    #[error("{0}")]
    InvalidPricing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_filters_blank_values() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("x".to_string()), Some("x".to_string()));
    }

    #[test]
    fn default_usdc_address_parses() {
        let addr: Address = DEFAULT_USDC_ADDRESS.parse().unwrap();
        assert_ne!(addr, Address::ZERO);
    }
}
