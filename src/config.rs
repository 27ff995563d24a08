use alloy::primitives::Address;
use reqwest::Url;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub listener: ListenerConfig,
    #[serde(default)]
    pub network: NetworkDescriptor,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    pub rpc_http: String,
    pub rpc_ws: Option<String>,
    pub contract_address: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_dedup_capacity() -> usize {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

// ============================================================
// Network Descriptor
// ============================================================

/// Chain the contract lives on. Defaults to a local Anvil node.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default)]
    pub native_currency: NativeCurrency,
}

impl Default for NetworkDescriptor {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            name: default_network_name(),
            native_currency: NativeCurrency::default(),
        }
    }
}

fn default_chain_id() -> u64 {
    31337
}

fn default_network_name() -> String {
    "Anvil Local".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NativeCurrency {
    #[serde(default = "default_currency_name")]
    pub name: String,
    #[serde(default = "default_currency_symbol")]
    pub symbol: String,
    #[serde(default = "default_currency_decimals")]
    pub decimals: u8,
}

impl Default for NativeCurrency {
    fn default() -> Self {
        Self {
            name: default_currency_name(),
            symbol: default_currency_symbol(),
            decimals: default_currency_decimals(),
        }
    }
}

fn default_currency_name() -> String {
    "Ether".to_string()
}

fn default_currency_symbol() -> String {
    "ETH".to_string()
}

fn default_currency_decimals() -> u8 {
    18
}

// ============================================================
// Notification Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

// ============================================================
// Connection Parameters
// ============================================================

/// Validated parameters a listener session is constructed with.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub endpoint: Url,
    pub ws_endpoint: Option<Url>,
    pub contract: Address,
    pub network: NetworkDescriptor,
    pub poll_interval: Duration,
    /// Widest block span requested per `eth_getLogs` call when polling.
    pub max_block_range: u64,
}

impl ConnectionParams {
    pub fn new(
        endpoint: &str,
        contract: &str,
        network: NetworkDescriptor,
    ) -> Result<Self, ConfigError> {
        let endpoint = parse_endpoint(endpoint, &["http", "https", "ws", "wss"])?;
        let contract = parse_address(contract)?;

        if network.chain_id == 0 {
            return Err(ConfigError::InvalidNetwork(format!(
                "chain id of '{}' must be non-zero",
                network.name
            )));
        }

        Ok(Self {
            endpoint,
            ws_endpoint: None,
            contract,
            network,
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            max_block_range: default_max_block_range(),
        })
    }

    pub fn with_ws_endpoint(mut self, ws_endpoint: &str) -> Result<Self, ConfigError> {
        self.ws_endpoint = Some(parse_endpoint(ws_endpoint, &["ws", "wss"])?);
        Ok(self)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    /// WebSocket URL to subscribe through, if any.
    pub fn pubsub_endpoint(&self) -> Option<&Url> {
        self.ws_endpoint
            .as_ref()
            .or_else(|| is_ws(&self.endpoint).then_some(&self.endpoint))
    }

    /// HTTP URL to poll through, if any.
    pub fn polling_endpoint(&self) -> Option<&Url> {
        (!is_ws(&self.endpoint)).then_some(&self.endpoint)
    }
}

fn is_ws(url: &Url) -> bool {
    matches!(url.scheme(), "ws" | "wss")
}

fn parse_endpoint(endpoint: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    Ok(url)
}

/// Parse a `0x`-prefixed 20-byte hex address.
pub fn parse_address(address: &str) -> Result<Address, ConfigError> {
    if !address.starts_with("0x") || address.len() != 42 {
        return Err(ConfigError::InvalidAddress(address.to_string()));
    }
    Address::from_str(address).map_err(|_| ConfigError::InvalidAddress(address.to_string()))
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        self.connection_params()?;

        if let Some(url) = &self.notifications.webhook_url {
            parse_endpoint(url, &["http", "https"])?;
        }
        Ok(())
    }

    /// Build the validated connection parameters for the listener session.
    pub fn connection_params(&self) -> Result<ConnectionParams, ConfigError> {
        let mut params = ConnectionParams::new(
            &self.listener.rpc_http,
            &self.listener.contract_address,
            self.network.clone(),
        )?
        .with_poll_interval(Duration::from_millis(self.listener.poll_interval_ms))
        .with_max_block_range(self.listener.max_block_range);

        if let Some(ws) = &self.listener.rpc_ws {
            params = params.with_ws_endpoint(ws)?;
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[listener]
rpc_http = "http://127.0.0.1:8545"
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[database]
url = "postgres://localhost/minilend"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listener.poll_interval_ms, 2000); // default
        assert_eq!(config.listener.dedup_capacity, 4096); // default
        assert_eq!(config.listener.max_block_range, 1000); // default
        assert!(config.listener.rpc_ws.is_none());
        assert_eq!(config.network.chain_id, 31337);
        assert_eq!(config.network.native_currency.symbol, "ETH");
        assert_eq!(config.network.native_currency.decimals, 18);
        assert_eq!(config.database.as_ref().unwrap().max_connections, 10);
        assert!(config.notifications.webhook_url.is_none());
        assert_eq!(config.notifications.timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_network_override() {
        let toml_str = r#"
[listener]
rpc_http = "https://rpc.sepolia.org"
rpc_ws = "wss://rpc.sepolia.org/ws"
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
poll_interval_ms = 500
max_block_range = 0

[network]
chain_id = 11155111
name = "Sepolia"

[network.native_currency]
name = "Sepolia Ether"
symbol = "SEP"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let params = config.connection_params().unwrap();
        assert_eq!(params.network.chain_id, 11155111);
        assert_eq!(params.network.native_currency.decimals, 18);
        assert_eq!(params.poll_interval, Duration::from_millis(500));
        assert_eq!(params.max_block_range, 1); // zero would never advance
        assert_eq!(params.pubsub_endpoint().unwrap().scheme(), "wss");
        assert_eq!(params.polling_endpoint().unwrap().scheme(), "https");
    }

    #[test]
    fn test_ws_only_endpoint() {
        let params =
            ConnectionParams::new("ws://127.0.0.1:8546", CONTRACT, NetworkDescriptor::default())
                .unwrap();
        assert!(params.pubsub_endpoint().is_some());
        assert!(params.polling_endpoint().is_none());
    }

    #[test]
    fn test_bad_address() {
        let err = ConnectionParams::new(
            "http://127.0.0.1:8545",
            "not-an-address",
            NetworkDescriptor::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));

        // Right length, not hex
        let err = parse_address("0xZZbDB2315678afecb367f032d93F642f64180aa3").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn test_bad_endpoint() {
        let err = ConnectionParams::new("ftp://example.com", CONTRACT, NetworkDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));

        let err = ConnectionParams::new("nonsense", CONTRACT, NetworkDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));

        let params =
            ConnectionParams::new("http://127.0.0.1:8545", CONTRACT, NetworkDescriptor::default())
                .unwrap();
        assert!(params.with_ws_endpoint("http://127.0.0.1:8546").is_err());
    }

    #[test]
    fn test_zero_chain_id() {
        let network = NetworkDescriptor {
            chain_id: 0,
            ..NetworkDescriptor::default()
        };
        let err = ConnectionParams::new("http://127.0.0.1:8545", CONTRACT, network).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNetwork(_)));
    }

    #[test]
    fn test_validate_bad_webhook() {
        let toml_str = r#"
[listener]
rpc_http = "http://127.0.0.1:8545"
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[notifications]
webhook_url = "not a url"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
