//! Application configuration: YAML file, `${VAR:default}` substitution,
//! then validation into typed contract watches.

use alloy_primitives::{Address, B256};
use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;

use chainevents_core::{
    BlockRange, ConfigError, ContractWatch, HandlerServiceConfig, WatchedEvent,
};
use chainevents_listener::{BlockListenerConfig, ListenerConfig, PoolDiscoveryConfig};
use chainevents_observability::LogConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    pub ethereum: EthereumConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub handler: HandlerServiceConfig,
    /// Follow a Uniswap V3 factory and watch the pools it deploys.
    #[serde(default, alias = "pool_discovery", alias = "uniswap")]
    pub pool_discovery: Option<PoolDiscoveryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthereumConfig {
    #[serde(default, alias = "node_url")]
    pub node_url: String,
    #[serde(default, alias = "websocket_url")]
    pub websocket_url: Option<String>,
    #[serde(default, alias = "start_block")]
    pub start_block: Option<u64>,
    /// Milliseconds between block polls.
    #[serde(default = "default_block_polling_interval", alias = "block_polling_interval")]
    pub block_polling_interval: u64,
    /// Run the block listener even without a websocket URL.
    #[serde(default, alias = "block_listener")]
    pub block_listener: bool,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
}

fn default_block_polling_interval() -> u64 {
    1_000
}

/// A contract as written in the file; addresses and hashes are still text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractSpec {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default, alias = "block_range")]
    pub block_range: Option<BlockRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSpec {
    pub name: String,
    #[serde(default)]
    pub signature: String,
    /// Positional topic constraints after the signature; `~` is a wildcard.
    #[serde(default)]
    pub topics: Vec<Option<String>>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let tree: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let tree = substitute_env(tree, &|name: &str| std::env::var(name).ok());
        serde_yaml::from_value(tree).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check the node URL and every contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ethereum.node_url.trim().is_empty() {
            return Err(ConfigError::Missing("ethereum.node-url".into()));
        }
        self.watches().map(drop)
    }

    /// Typed watches. Disabled events are kept only if their signature parses.
    pub fn watches(&self) -> Result<Vec<ContractWatch>, ConfigError> {
        self.ethereum.contracts.iter().map(ContractSpec::to_watch).collect()
    }

    /// Watches, refusing an empty list. For commands that subscribe or extract.
    pub fn require_watches(&self) -> Result<Vec<ContractWatch>, ConfigError> {
        let watches = self.watches()?;
        if watches.is_empty() {
            return Err(ConfigError::EmptyWatchList);
        }
        Ok(watches)
    }

    /// Blocks are polled when a realtime source is configured. An
    /// unresolved `${VAR}` reference does not count.
    pub fn block_listener_enabled(&self) -> bool {
        self.ethereum.block_listener
            || self
                .ethereum
                .websocket_url
                .as_deref()
                .map(str::trim)
                .is_some_and(|u| !u.is_empty() && !u.starts_with("${"))
    }

    pub fn block_listener_config(&self) -> BlockListenerConfig {
        BlockListenerConfig {
            polling_interval_ms: self.ethereum.block_polling_interval,
            start_block: self.ethereum.start_block,
            ..Default::default()
        }
    }
}

impl ContractSpec {
    fn to_watch(&self) -> Result<ContractWatch, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidContract {
            contract: self.name.clone(),
            reason,
        };
        let address: Address = self
            .address
            .trim()
            .parse()
            .map_err(|e| invalid(format!("invalid address '{}': {e}", self.address)))?;

        let mut events = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let signature = match parse_hash(&event.signature) {
                Some(sig) => sig,
                None if !event.enabled => continue,
                None if event.signature.trim().is_empty() => {
                    return Err(invalid(format!("event '{}' has no signature", event.name)))
                }
                None => {
                    return Err(invalid(format!(
                        "event '{}' has an invalid signature '{}'",
                        event.name, event.signature
                    )))
                }
            };
            let topics = event
                .topics
                .iter()
                .map(|t| match t {
                    None => Ok(None),
                    Some(t) => parse_hash(t).map(Some).ok_or_else(|| {
                        invalid(format!(
                            "event '{}' topic '{t}' is not 32-byte hex",
                            event.name
                        ))
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            events.push(WatchedEvent {
                name: event.name.clone(),
                signature,
                topics,
                enabled: event.enabled,
            });
        }

        Ok(ContractWatch {
            name: self.name.clone(),
            address,
            events,
            block_range: self.block_range,
        })
    }
}

fn parse_hash(s: &str) -> Option<B256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

// ─── Environment substitution ────────────────────────────────────────────────

/// Replace every string scalar of the exact form `${VAR}` or `${VAR:default}`.
/// An unset variable without a default leaves the string as written.
pub fn substitute_env(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_scalar(&s, lookup).unwrap_or(s)),
        Value::Sequence(items) => {
            Value::Sequence(items.into_iter().map(|v| substitute_env(v, lookup)).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env(v, lookup)))
                .collect(),
        ),
        Value::Tagged(tagged) => {
            let mut tagged = *tagged;
            tagged.value = substitute_env(tagged.value, lookup);
            Value::Tagged(Box::new(tagged))
        }
        other => other,
    }
}

fn substitute_scalar(s: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    match inner.split_once(':') {
        Some((name, default)) => Some(lookup(name).unwrap_or_else(|| default.to_string())),
        None => lookup(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
ethereum:
  node-url: ${ETHEREUM_NODE_URL:http://localhost:8545}
  websocket-url: ${ETHEREUM_WS_URL}
  start-block: 19000000
  block-polling-interval: 2000
  listener:
    poll-interval-ms: 250
  contracts:
    - name: USDC
      address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
      events:
        - name: Transfer
          signature: "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        - name: Approval
          signature: ""
          enabled: false
logging:
  level: debug
  components:
    chainevents-rpc: warn
handler:
  large-transfer-threshold: "1000000"
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn substitution_rules() {
        let lookup = env(&[("SET", "value")]);
        let sub = |s: &str| substitute_env(Value::String(s.into()), &lookup);
        assert_eq!(sub("${SET}"), Value::String("value".into()));
        assert_eq!(sub("${SET:fallback}"), Value::String("value".into()));
        assert_eq!(sub("${UNSET:fallback}"), Value::String("fallback".into()));
        assert_eq!(sub("${UNSET}"), Value::String("${UNSET}".into()));
        assert_eq!(sub("${UNSET:}"), Value::String(String::new()));
        // Only whole-scalar references are substituted.
        assert_eq!(sub("x-${SET}"), Value::String("x-${SET}".into()));
    }

    #[test]
    fn default_url_applies_when_unset() {
        let tree: Value = serde_yaml::from_str(SAMPLE).unwrap();
        let tree = substitute_env(tree, &env(&[]));
        let config: AppConfig = serde_yaml::from_value(tree).unwrap();
        assert_eq!(config.ethereum.node_url, "http://localhost:8545");
        assert_eq!(config.ethereum.websocket_url.as_deref(), Some("${ETHEREUM_WS_URL}"));
        assert_eq!(config.ethereum.start_block, Some(19_000_000));
        assert_eq!(config.ethereum.listener.poll_interval_ms, 250);
        assert_eq!(config.ethereum.listener.error_backoff_ms, 5_000);
        assert_eq!(config.logging.directives(), "debug,chainevents_rpc=warn");
        assert_eq!(config.handler.large_transfer_threshold, alloy_primitives::U256::from(1_000_000u64));
        assert_eq!(config.block_listener_config().polling_interval_ms, 2_000);
    }

    #[test]
    fn disabled_event_without_signature_is_dropped() {
        let tree = substitute_env(serde_yaml::from_str(SAMPLE).unwrap(), &env(&[]));
        let config: AppConfig = serde_yaml::from_value(tree).unwrap();
        config.validate().unwrap();
        let watches = config.watches().unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].events.len(), 1);
        assert_eq!(watches[0].events[0].name, "Transfer");
    }

    fn single_contract(address: &str, signature: &str, topics: &[&str]) -> AppConfig {
        AppConfig {
            ethereum: EthereumConfig {
                node_url: "http://localhost:8545".into(),
                websocket_url: None,
                start_block: None,
                block_polling_interval: 1_000,
                block_listener: false,
                listener: ListenerConfig::default(),
                contracts: vec![ContractSpec {
                    name: "Token".into(),
                    address: address.into(),
                    events: vec![EventSpec {
                        name: "Transfer".into(),
                        signature: signature.into(),
                        topics: topics.iter().map(|t| Some(t.to_string())).collect(),
                        enabled: true,
                    }],
                    block_range: None,
                }],
            },
            logging: LogConfig::default(),
            handler: HandlerServiceConfig::default(),
            pool_discovery: None,
        }
    }

    const SIG: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    const ADDR: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    #[test]
    fn invalid_entries_are_rejected() {
        let bad_address = single_contract("0x1234", SIG, &[]);
        assert!(matches!(
            bad_address.validate(),
            Err(ConfigError::InvalidContract { .. })
        ));

        let empty_sig = single_contract(ADDR, "", &[]);
        let err = empty_sig.validate().unwrap_err();
        assert!(err.to_string().contains("has no signature"), "{err}");

        let short_topic = single_contract(ADDR, SIG, &["0x01"]);
        let err = short_topic.validate().unwrap_err();
        assert!(err.to_string().contains("not 32-byte hex"), "{err}");

        let mut no_url = single_contract(ADDR, SIG, &[]);
        no_url.ethereum.node_url = "  ".into();
        assert!(matches!(no_url.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn null_topic_is_a_wildcard() {
        let yaml = r#"
ethereum:
  node-url: http://localhost:8545
  contracts:
    - name: USDC
      address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
      events:
        - name: Transfer
          signature: "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
          topics: [~, "0x000000000000000000000000742daa7c73f8c8b32f93e8cfa14c45f4b82ed5f8"]
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        let watches = config.require_watches().unwrap();
        let filter = watches[0].filter_for(&watches[0].events[0]);
        assert_eq!(filter.topics.len(), 3);
        assert_eq!(filter.topics[0], parse_hash(SIG));
        assert_eq!(filter.topics[1], None);
        assert!(filter.topics[2].is_some());
    }

    #[test]
    fn pool_discovery_section_is_optional() {
        let tree = substitute_env(serde_yaml::from_str(SAMPLE).unwrap(), &env(&[]));
        let config: AppConfig = serde_yaml::from_value(tree).unwrap();
        assert!(config.pool_discovery.is_none());

        let yaml = r#"
ethereum:
  node-url: http://localhost:8545
pool-discovery:
  pools:
    - name: USDC/WETH
      address: "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        let discovery = config.pool_discovery.unwrap();
        assert_eq!(discovery.factory, chainevents_listener::discovery::UNISWAP_V3_FACTORY);
        assert_eq!(discovery.pools.len(), 1);
    }

    #[test]
    fn empty_watch_list_only_fails_when_required() {
        let mut config = single_contract(ADDR, SIG, &[]);
        config.ethereum.contracts.clear();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.require_watches(),
            Err(ConfigError::EmptyWatchList)
        ));
    }

    #[test]
    fn block_listener_needs_a_realtime_source() {
        let mut config = single_contract(ADDR, SIG, &[]);
        assert!(!config.block_listener_enabled());
        config.ethereum.websocket_url = Some("wss://node".into());
        assert!(config.block_listener_enabled());
        config.ethereum.websocket_url = Some("${ETHEREUM_WS_URL}".into());
        assert!(!config.block_listener_enabled());
        config.ethereum.block_listener = true;
        assert!(config.block_listener_enabled());
    }
}
