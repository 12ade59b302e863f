//! Raw node records and watch configuration.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A log entry as returned by `eth_getLogs` / `eth_getFilterChanges`.
///
/// Produced by the node and never mutated by the decoding path. The optional
/// `contract_name` / `event_name` / `event_signature` annotations are filled
/// in by the extractor so a bundle can be transformed offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(with = "quantity")]
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    pub transaction_hash: B256,
    #[serde(with = "quantity")]
    pub log_index: u64,
    /// Block timestamp (unix seconds), when the node or extractor embedded it.
    #[serde(
        default,
        alias = "blockTimestamp",
        with = "quantity_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    #[serde(
        default,
        rename = "contract_name",
        alias = "contractName",
        skip_serializing_if = "Option::is_none"
    )]
    pub contract_name: Option<String>,
    #[serde(
        default,
        rename = "event_name",
        alias = "eventName",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_name: Option<String>,
    #[serde(
        default,
        rename = "event_signature",
        alias = "eventSignature",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_signature: Option<B256>,
}

impl RawLog {
    /// The event signature hash, if the log has any topics.
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A block reference in a log filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Earliest,
    Number(u64),
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Latest => s.serialize_str("latest"),
            Self::Earliest => s.serialize_str("earliest"),
            Self::Number(n) => s.serialize_str(&format!("{n:#x}")),
        }
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }
        match Repr::deserialize(d)? {
            Repr::Num(n) => Ok(Self::Number(n)),
            Repr::Str(s) => match s.as_str() {
                "latest" => Ok(Self::Latest),
                "earliest" => Ok(Self::Earliest),
                other => parse_quantity(other)
                    .map(Self::Number)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid block tag '{other}'"))),
            },
        }
    }
}

/// Filter parameters for `eth_newFilter` / `eth_getLogs`.
///
/// `topics[0]` is the event signature; later entries are exact-match
/// constraints where `None` is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockTag>,
    pub topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub fn new(address: Address, signature: B256) -> Self {
        Self {
            address,
            from_block: None,
            to_block: None,
            topics: vec![Some(signature)],
        }
    }

    pub fn range(mut self, from: BlockTag, to: BlockTag) -> Self {
        self.from_block = Some(from);
        self.to_block = Some(to);
        self
    }

    pub fn signature(&self) -> Option<&B256> {
        self.topics.first().and_then(|t| t.as_ref())
    }
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// Block header data as returned by `eth_getBlockByNumber`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
    #[serde(with = "quantity")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    #[serde(with = "quantity")]
    pub gas_used: u64,
    #[serde(with = "quantity")]
    pub gas_limit: u64,
    /// Transaction hashes or full objects, depending on `include_txs`.
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(default, with = "quantity_opt", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<Address>,
}

impl BlockData {
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

// ─── Watch configuration ─────────────────────────────────────────────────────

/// Inclusive block bounds applied to every filter of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockRange {
    #[serde(default, alias = "from_block")]
    pub from_block: BlockTag,
    #[serde(default, alias = "to_block")]
    pub to_block: BlockTag,
}

/// One event of a watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    pub name: String,
    pub signature: B256,
    /// Topic constraints after the signature, by position. `None` matches
    /// anything, so `[None, Some(x)]` constrains only `topics[2]`.
    #[serde(default)]
    pub topics: Vec<Option<B256>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A contract and the events to subscribe to on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractWatch {
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub events: Vec<WatchedEvent>,
    #[serde(default, alias = "block_range", skip_serializing_if = "Option::is_none")]
    pub block_range: Option<BlockRange>,
}

impl ContractWatch {
    pub fn enabled_events(&self) -> impl Iterator<Item = &WatchedEvent> {
        self.events.iter().filter(|e| e.enabled)
    }

    /// Build the node-side filter for one of this contract's events.
    pub fn filter_for(&self, event: &WatchedEvent) -> LogFilter {
        let mut topics = Vec::with_capacity(1 + event.topics.len());
        topics.push(Some(event.signature));
        topics.extend(event.topics.iter().copied());
        LogFilter {
            address: self.address,
            from_block: Some(self.block_range.map(|r| r.from_block).unwrap_or_default()),
            to_block: self.block_range.map(|r| r.to_block),
            topics,
        }
    }

    /// Find the enabled event whose signature equals `topic0`.
    pub fn event_by_signature(&self, topic0: &B256) -> Option<&WatchedEvent> {
        self.enabled_events().find(|e| &e.signature == topic0)
    }
}

// ─── Serde helpers ───────────────────────────────────────────────────────────

/// Parse a `0x`-prefixed hex quantity or a plain decimal string.
pub fn parse_quantity(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if hex.is_empty() => Some(0),
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Num(u64),
    Str(String),
}

impl QuantityRepr {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Num(n) => Ok(n),
            Self::Str(s) => {
                parse_quantity(&s).ok_or_else(|| E::custom(format!("invalid quantity '{s}'")))
            }
        }
    }
}

/// `u64` fields that arrive as JSON-RPC hex quantities or plain numbers.
/// Serialised as plain numbers.
pub mod quantity {
    use super::QuantityRepr;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        QuantityRepr::deserialize(d)?.into_u64()
    }
}

/// Optional variant of [`quantity`].
pub mod quantity_opt {
    use super::QuantityRepr;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_some(n),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<QuantityRepr>::deserialize(d)?
            .map(QuantityRepr::into_u64)
            .transpose()
    }
}

/// Arbitrary-precision integers serialised as decimal strings.
pub mod decimal {
    use serde::Serializer;
    use std::fmt::Display;

    pub fn serialize<T: Display, S: Serializer>(v: &T, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};
    use serde_json::json;

    fn node_log() -> Value {
        json!({
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x000000000000000000000000000000000000000000000000000000000000dead"
            ],
            "data": "0x01",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000002",
            "logIndex": "0x5",
            "removed": false
        })
    }

    #[test]
    fn raw_log_from_node_json() {
        let log: RawLog = serde_json::from_value(node_log()).unwrap();
        assert_eq!(log.block_number, 5_000_000_000);
        assert_eq!(log.log_index, 5);
        assert_eq!(log.topics.len(), 2);
        assert_eq!(log.data.as_ref(), &[0x01]);
        assert!(log.timestamp.is_none());
        assert!(!log.is_removed());
    }

    #[test]
    fn raw_log_accepts_plain_numbers_and_annotations() {
        let mut v = node_log();
        v["blockNumber"] = json!(42);
        v["logIndex"] = json!(0);
        v["timestamp"] = json!(1_700_000_000u64);
        v["contract_name"] = json!("USDC");
        let log: RawLog = serde_json::from_value(v).unwrap();
        assert_eq!(log.block_number, 42);
        assert_eq!(log.timestamp, Some(1_700_000_000));
        assert_eq!(log.contract_name.as_deref(), Some("USDC"));
    }

    #[test]
    fn parse_quantity_forms() {
        assert_eq!(parse_quantity("0x1"), Some(1));
        assert_eq!(parse_quantity("0xff"), Some(255));
        assert_eq!(parse_quantity("0x"), Some(0));
        assert_eq!(parse_quantity("1234"), Some(1234));
        assert_eq!(parse_quantity("zz"), None);
    }

    #[test]
    fn filter_serialises_as_json_rpc() {
        let watch = ContractWatch {
            name: "USDC".into(),
            address: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            events: vec![WatchedEvent {
                name: "Transfer".into(),
                signature: b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"),
                topics: vec![Some(B256::ZERO)],
                enabled: true,
            }],
            block_range: Some(BlockRange {
                from_block: BlockTag::Number(16),
                to_block: BlockTag::Latest,
            }),
        };
        let filter = watch.filter_for(&watch.events[0]);
        let v = serde_json::to_value(&filter).unwrap();
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "latest");
        assert_eq!(v["topics"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn wildcard_topic_positions_are_kept() {
        let recipient = b256!("000000000000000000000000742daa7c73f8c8b32f93e8cfa14c45f4b82ed5f8");
        let watch: ContractWatch = serde_json::from_value(json!({
            "name": "USDC",
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "events": [{
                "name": "Transfer",
                "signature": "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "topics": [null, recipient]
            }]
        }))
        .unwrap();
        let filter = watch.filter_for(&watch.events[0]);
        assert_eq!(filter.topics.len(), 3);
        assert_eq!(filter.topics[1], None);
        assert_eq!(filter.topics[2], Some(recipient));

        let v = serde_json::to_value(&filter).unwrap();
        assert!(v["topics"][1].is_null());
    }

    #[test]
    fn filter_defaults_to_latest_without_range() {
        let watch: ContractWatch = serde_json::from_value(json!({
            "name": "Pool",
            "address": "0x000000000004444c5dc75cb358380d2e3de08a90",
            "events": [
                { "name": "Swap", "signature": "0x0000000000000000000000000000000000000000000000000000000000000001" },
                { "name": "Donate", "signature": "0x0000000000000000000000000000000000000000000000000000000000000002", "enabled": false }
            ]
        }))
        .unwrap();
        assert_eq!(watch.enabled_events().count(), 1);
        let filter = watch.filter_for(&watch.events[0]);
        assert_eq!(filter.from_block, Some(BlockTag::Latest));
        assert_eq!(filter.to_block, None);
    }

    #[test]
    fn block_from_node_json() {
        let block: BlockData = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0x0000000000000000000000000000000000000000000000000000000000000010",
            "parentHash": "0x000000000000000000000000000000000000000000000000000000000000000f",
            "timestamp": "0x6553f100",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "transactions": ["0xab", "0xcd"],
            "size": "0x220",
            "miner": "0x0000000000000000000000000000000000000000"
        }))
        .unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.gas_used, 21_000);
        assert_eq!(block.gas_limit, 30_000_000);
        assert_eq!(block.transaction_count(), 2);
        assert_eq!(block.size, Some(0x220));
    }
}
