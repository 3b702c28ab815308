//! Data model shared by the reconciler, the dedup cache and the HTTP layer.
//!
//! Numeric fields use the node's `0x`-prefixed hex quantity encoding on the
//! wire so responses can be consumed by existing Ethereum JSON-RPC tooling.

use alloy_eips::eip2930::AccessList;
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
    Serializer,
};

pub const LEGACY_TX_TYPE: u8 = 0;
pub const EIP2930_TX_TYPE: u8 = 1;
pub const EIP1559_TX_TYPE: u8 = 2;

/// Parameters of a single poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Filter handed out by a previous poll. Empty or absent starts fresh.
    pub filter_id: Option<String>,
    /// Only return transactions whose recovered sender is this address.
    pub from: Option<Address>,
}

impl Query {
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn with_filter(filter_id: impl Into<String>) -> Self {
        Self {
            filter_id: Some(filter_id.into()),
            from: None,
        }
    }

    pub fn from_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// The caller's filter id, if it is present and non-empty.
    pub fn active_filter(&self) -> Option<&str> {
        self.filter_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Transaction as reported by the node. Read-only to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: B256,
    #[serde(rename = "type", default, with = "alloy_serde::quantity")]
    pub tx_type: u8,
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    #[serde(
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_price: Option<u128>,
    #[serde(
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_fee_per_gas: Option<u128>,
    #[serde(
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(rename = "gas", with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<AccessList>,
    #[serde(
        default,
        with = "alloy_serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub chain_id: Option<u64>,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

impl RawTransaction {
    /// Whether the signature binds a chain id. Legacy transactions are
    /// unprotected when `v` is one of the pre-EIP-155 values.
    pub fn is_protected(&self) -> bool {
        if self.tx_type != LEGACY_TX_TYPE {
            return true;
        }
        match u64::try_from(self.v) {
            Ok(v) => !matches!(v, 0 | 1 | 27 | 28),
            Err(_) => true,
        }
    }

    /// Chain id encoded in a protected legacy `v` (`v = 2 * chain_id + 35 + parity`).
    pub fn chain_id_from_v(&self) -> Option<u64> {
        let v = u64::try_from(self.v).ok()?;
        v.checked_sub(35).map(|rest| rest / 2)
    }

    /// Chain id the transaction is bound to, if any.
    pub fn effective_chain_id(&self) -> Option<u64> {
        if self.chain_id.is_some() {
            return self.chain_id;
        }
        if self.tx_type == LEGACY_TX_TYPE && self.is_protected() {
            return self.chain_id_from_v();
        }
        None
    }

    /// Legacy gas price, or the fee cap for dynamic-fee transactions.
    pub fn price(&self) -> u128 {
        match self.tx_type {
            EIP1559_TX_TYPE => self.max_fee_per_gas.or(self.gas_price),
            _ => self.gas_price,
        }
        .unwrap_or_default()
    }
}

/// Header fields of the node's pending block that the poller needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBlockHeader {
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
}

/// Pending block with full transaction bodies, consumed once by the init path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBlockSnapshot {
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// A node transaction paired with its recovered sender and the pending-block
/// timestamp it was observed under.
///
/// Only the assembler builds these; `from` is always derived from the
/// signature of `raw`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    raw: RawTransaction,
    from: Address,
    timestamp: u64,
}

impl TransactionRecord {
    pub(crate) fn new(raw: RawTransaction, from: Address, timestamp: u64) -> Self {
        Self {
            raw,
            from,
            timestamp,
        }
    }

    pub fn raw(&self) -> &RawTransaction {
        &self.raw
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn hash(&self) -> B256 {
        self.raw.hash
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionJson<'a> {
    #[serde(with = "alloy_serde::quantity")]
    nonce: u64,
    #[serde(with = "alloy_serde::quantity")]
    gas_price: u128,
    #[serde(rename = "gas", with = "alloy_serde::quantity")]
    gas_limit: u64,
    to: Option<Address>,
    from: Address,
    value: U256,
    input: &'a Bytes,
    v: U256,
    r: U256,
    s: U256,
    hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    chain_id: u64,
    #[serde(with = "alloy_serde::quantity")]
    timestamp: u64,
}

impl Serialize for TransactionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = &self.raw;
        TransactionJson {
            nonce: raw.nonce,
            gas_price: raw.price(),
            gas_limit: raw.gas_limit,
            to: raw.to,
            from: self.from,
            value: raw.value,
            input: &raw.input,
            v: raw.v,
            r: raw.r,
            s: raw.s,
            hash: raw.hash,
            chain_id: raw.effective_chain_id().unwrap_or_default(),
            timestamp: self.timestamp,
        }
        .serialize(serializer)
    }
}

/// Answer to one poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub filter_id: String,
    pub transactions: Vec<TransactionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{
        address,
        b256,
        bytes,
    };
    use serde_json::json;

    fn legacy_json() -> serde_json::Value {
        json!({
            "blockHash": null,
            "blockNumber": null,
            "from": "0x0000000000000000000000000000000000000001",
            "gas": "0x5208",
            "gasPrice": "0x4a817c800",
            "hash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "input": "0x",
            "nonce": "0x9",
            "to": "0x3535353535353535353535353535353535353535",
            "transactionIndex": null,
            "value": "0xde0b6b3a7640000",
            "type": "0x0",
            "chainId": "0x1",
            "v": "0x25",
            "r": "0x28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276",
            "s": "0x67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        })
    }

    #[test]
    fn decodes_node_transaction() {
        let tx: RawTransaction = serde_json::from_value(legacy_json()).unwrap();

        assert_eq!(tx.tx_type, LEGACY_TX_TYPE);
        assert_eq!(tx.nonce, 9);
        assert_eq!(tx.gas_limit, 21_000);
        assert_eq!(tx.gas_price, Some(20_000_000_000));
        assert_eq!(
            tx.to,
            Some(address!("3535353535353535353535353535353535353535"))
        );
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(tx.v, U256::from(37));
        assert!(tx.is_protected());
        assert_eq!(tx.effective_chain_id(), Some(1));
    }

    #[test]
    fn missing_type_defaults_to_legacy() {
        let mut value = legacy_json();
        let object = value.as_object_mut().unwrap();
        object.remove("type");
        object.remove("chainId");
        let tx: RawTransaction = serde_json::from_value(value).unwrap();

        assert_eq!(tx.tx_type, LEGACY_TX_TYPE);
        assert_eq!(tx.chain_id, None);
        assert_eq!(tx.effective_chain_id(), Some(1), "derived from v");
    }

    #[test]
    fn unprotected_legacy_values() {
        let mut tx: RawTransaction = serde_json::from_value(legacy_json()).unwrap();
        tx.chain_id = None;
        for v in [0u64, 1, 27, 28] {
            tx.v = U256::from(v);
            assert!(!tx.is_protected(), "v = {v} should be unprotected");
            assert_eq!(tx.effective_chain_id(), None);
        }
    }

    #[test]
    fn record_serializes_with_hex_quantities() {
        let raw: RawTransaction = serde_json::from_value(legacy_json()).unwrap();
        let from = address!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f");
        let record = TransactionRecord::new(raw, from, 0x5f5e100);

        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(
            encoded,
            json!({
                "nonce": "0x9",
                "gasPrice": "0x4a817c800",
                "gas": "0x5208",
                "to": "0x3535353535353535353535353535353535353535",
                "from": "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f",
                "value": "0xde0b6b3a7640000",
                "input": "0x",
                "v": "0x25",
                "r": "0x28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276",
                "s": "0x67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83",
                "hash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
                "chainId": "0x1",
                "timestamp": "0x5f5e100"
            })
        );
    }

    #[test]
    fn contract_creation_serializes_null_recipient() {
        let mut raw: RawTransaction = serde_json::from_value(legacy_json()).unwrap();
        raw.to = None;
        raw.input = bytes!("6080");
        let record = TransactionRecord::new(raw, Address::ZERO, 1);

        let encoded = serde_json::to_value(&record).unwrap();
        assert!(encoded["to"].is_null());
        assert_eq!(encoded["input"], "0x6080");
    }

    #[test]
    fn response_uses_filter_id_key() {
        let response = Response {
            filter_id: "0xabc".into(),
            transactions: vec![],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "filterId": "0xabc", "transactions": [] })
        );
    }

    #[test]
    fn active_filter_ignores_empty_ids() {
        assert_eq!(Query::fresh().active_filter(), None);
        assert_eq!(Query::with_filter("").active_filter(), None);
        assert_eq!(Query::with_filter("0x1").active_filter(), Some("0x1"));
    }

    #[test]
    fn dynamic_fee_price_uses_fee_cap() {
        let mut raw: RawTransaction = serde_json::from_value(legacy_json()).unwrap();
        raw.tx_type = EIP1559_TX_TYPE;
        raw.max_fee_per_gas = Some(30);
        raw.gas_price = Some(25);
        assert_eq!(raw.price(), 30);

        let hash = b256!("88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b");
        assert_eq!(raw.hash, hash);
    }
}
