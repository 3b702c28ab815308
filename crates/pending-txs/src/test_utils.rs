#![cfg(any(test, feature = "test"))]

//! Signed transaction builders shared by unit and integration tests.

use alloy_eips::eip2930::{
    AccessList,
    AccessListItem,
};
use alloy_primitives::{
    Address,
    B256,
    U256,
    address,
    b256,
    bytes,
    keccak256,
    uint,
};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde_json::Value;

use crate::{
    sender_recovery::{
        SigningScheme,
        signing_hash,
    },
    types::{
        EIP1559_TX_TYPE,
        EIP2930_TX_TYPE,
        LEGACY_TX_TYPE,
        RawTransaction,
    },
};

/// The signed example from EIP-155: nonce 9, 20 gwei, chain 1.
/// Its sender is `0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f`.
pub fn eip155_example() -> RawTransaction {
    RawTransaction {
        hash: b256!("33469b22e9f636356c4160a87eb19df52b7412e8eac32a4a55ffe88ea8350788"),
        tx_type: LEGACY_TX_TYPE,
        nonce: 9,
        gas_price: Some(20_000_000_000),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        gas_limit: 21_000,
        to: Some(address!("3535353535353535353535353535353535353535")),
        value: U256::from(1_000_000_000_000_000_000u128),
        input: Default::default(),
        access_list: None,
        chain_id: Some(1),
        v: U256::from(37),
        r: uint!(0x28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276_U256),
        s: uint!(0x67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83_U256),
    }
}

/// Deterministic key wrapper that signs [`RawTransaction`]s the way a wallet would.
#[derive(Debug, Clone)]
pub struct TestSigner {
    signer: PrivateKeySigner,
}

impl TestSigner {
    /// Key whose last byte is `seed`. `seed` must be nonzero.
    pub fn new(seed: u8) -> Self {
        let mut key_bytes = [0u8; 32];
        key_bytes[31] = seed;
        Self {
            signer: PrivateKeySigner::from_slice(&key_bytes).expect("valid test key"),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Legacy transaction with an empty signature. `chain_id` selects EIP-155 signing.
    pub fn unsigned_legacy(&self, nonce: u64, chain_id: Option<u64>) -> RawTransaction {
        RawTransaction {
            hash: B256::ZERO,
            tx_type: LEGACY_TX_TYPE,
            nonce,
            gas_price: Some(1_000_000_000),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_limit: 21_000,
            to: Some(address!("1111111111111111111111111111111111111111")),
            value: U256::from(1000 + nonce),
            input: bytes!("a9059cbb"),
            access_list: None,
            chain_id,
            v: U256::ZERO,
            r: U256::ZERO,
            s: U256::ZERO,
        }
    }

    pub fn legacy(&self, nonce: u64, chain_id: Option<u64>) -> RawTransaction {
        self.sign(self.unsigned_legacy(nonce, chain_id))
    }

    pub fn eip2930(&self, nonce: u64, chain_id: u64) -> RawTransaction {
        let mut tx = self.unsigned_legacy(nonce, Some(chain_id));
        tx.tx_type = EIP2930_TX_TYPE;
        tx.access_list = Some(AccessList(vec![AccessListItem {
            address: address!("2222222222222222222222222222222222222222"),
            storage_keys: vec![B256::with_last_byte(1)],
        }]));
        self.sign(tx)
    }

    pub fn eip1559(&self, nonce: u64, chain_id: u64) -> RawTransaction {
        let mut tx = self.unsigned_legacy(nonce, Some(chain_id));
        tx.tx_type = EIP1559_TX_TYPE;
        tx.gas_price = None;
        tx.max_fee_per_gas = Some(20_000_000_000);
        tx.max_priority_fee_per_gas = Some(1_000_000_000);
        self.sign(tx)
    }

    /// Signs `tx` and fills in `v`, `r`, `s` and a hash unique to the signature.
    pub fn sign(&self, mut tx: RawTransaction) -> RawTransaction {
        let scheme = match (tx.tx_type, tx.chain_id) {
            (LEGACY_TX_TYPE, None) => SigningScheme::Homestead,
            (LEGACY_TX_TYPE, Some(chain_id)) => SigningScheme::Eip155 { chain_id },
            (tx_type, chain_id) => SigningScheme::Typed {
                tx_type,
                chain_id: chain_id.unwrap_or_default(),
            },
        };
        let hash = signing_hash(&tx, scheme).expect("signable test transaction");
        let signature = self.signer.sign_hash_sync(&hash).expect("signing succeeds");
        let parity = u64::from(signature.v());

        tx.v = U256::from(match scheme {
            SigningScheme::Homestead => 27 + parity,
            SigningScheme::Eip155 { chain_id } => chain_id * 2 + 35 + parity,
            SigningScheme::Typed { .. } => parity,
        });
        tx.r = signature.r();
        tx.s = signature.s();

        let mut preimage = hash.to_vec();
        preimage.extend_from_slice(&tx.r.to_be_bytes::<32>());
        preimage.extend_from_slice(&tx.s.to_be_bytes::<32>());
        tx.hash = keccak256(preimage);
        tx
    }
}

/// JSON body a node returns for `tx`; `block_number` is `None` while pending.
pub fn node_transaction_json(tx: &RawTransaction, block_number: Option<u64>) -> Value {
    let mut value = serde_json::to_value(tx).expect("serializable transaction");
    let object = value.as_object_mut().expect("transaction object");
    object.insert(
        "blockNumber".into(),
        block_number.map_or(Value::Null, |n| Value::String(format!("{n:#x}"))),
    );
    value
}
