//! ECDSA sender recovery for pending-pool transactions using secp256k1.
//!
//! The signing scheme is chosen per transaction, since a pending pool holds
//! replay-protected and legacy transactions side by side:
//!
//! - legacy with a nonzero, protected `v`: EIP-155, bound to the chain id in `v`
//! - any other legacy `v`: Homestead, no chain id in the signing payload
//! - EIP-2930 / EIP-1559: the typed payload, which always carries its chain id

use alloy_consensus::{
    SignableTransaction,
    TxEip1559,
    TxEip2930,
    TxLegacy,
};
use alloy_primitives::{
    Address,
    B256,
    TxKind,
    U256,
    keccak256,
    uint,
};
use secp256k1::{
    Message,
    SECP256K1,
    ecdsa::{
        RecoverableSignature,
        RecoveryId,
    },
};

use crate::{
    error::RecoveryError,
    types::{
        EIP1559_TX_TYPE,
        EIP2930_TX_TYPE,
        LEGACY_TX_TYPE,
        RawTransaction,
    },
};

/// Half the secp256k1 group order. Homestead rejects signatures with a larger `s`.
const SECP256K1N_HALF: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Signing payload a transaction's signature was produced over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningScheme {
    Homestead,
    Eip155 { chain_id: u64 },
    Typed { tx_type: u8, chain_id: u64 },
}

/// Picks the signing scheme for `tx` from its type, `v` and chain id.
pub fn signing_scheme(tx: &RawTransaction) -> Result<SigningScheme, RecoveryError> {
    match tx.tx_type {
        LEGACY_TX_TYPE => {
            if tx.v.is_zero() || !tx.is_protected() {
                return Ok(SigningScheme::Homestead);
            }
            let derived = tx.chain_id_from_v().ok_or(RecoveryError::InvalidV(tx.v))?;
            match tx.chain_id {
                Some(declared) if declared != derived => {
                    Err(RecoveryError::ChainIdMismatch { declared, derived })
                }
                _ => Ok(SigningScheme::Eip155 { chain_id: derived }),
            }
        }
        EIP2930_TX_TYPE | EIP1559_TX_TYPE => {
            let chain_id = tx.chain_id.ok_or(RecoveryError::MissingChainId)?;
            Ok(SigningScheme::Typed {
                tx_type: tx.tx_type,
                chain_id,
            })
        }
        other => Err(RecoveryError::UnsupportedType(other)),
    }
}

/// Hash of the payload the sender signed under `scheme`.
pub fn signing_hash(tx: &RawTransaction, scheme: SigningScheme) -> Result<B256, RecoveryError> {
    let to = match tx.to {
        Some(address) => TxKind::Call(address),
        None => TxKind::Create,
    };

    let hash = match scheme {
        SigningScheme::Homestead | SigningScheme::Eip155 { .. } => {
            let chain_id = match scheme {
                SigningScheme::Eip155 { chain_id } => Some(chain_id),
                _ => None,
            };
            TxLegacy {
                chain_id,
                nonce: tx.nonce,
                gas_price: tx.gas_price.ok_or(RecoveryError::MissingField("gasPrice"))?,
                gas_limit: tx.gas_limit,
                to,
                value: tx.value,
                input: tx.input.clone(),
            }
            .signature_hash()
        }
        SigningScheme::Typed {
            tx_type: EIP2930_TX_TYPE,
            chain_id,
        } => TxEip2930 {
            chain_id,
            nonce: tx.nonce,
            gas_price: tx.gas_price.ok_or(RecoveryError::MissingField("gasPrice"))?,
            gas_limit: tx.gas_limit,
            to,
            value: tx.value,
            access_list: tx.access_list.clone().unwrap_or_default(),
            input: tx.input.clone(),
        }
        .signature_hash(),
        SigningScheme::Typed {
            tx_type: EIP1559_TX_TYPE,
            chain_id,
        } => TxEip1559 {
            chain_id,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx
                .max_fee_per_gas
                .ok_or(RecoveryError::MissingField("maxFeePerGas"))?,
            max_priority_fee_per_gas: tx
                .max_priority_fee_per_gas
                .ok_or(RecoveryError::MissingField("maxPriorityFeePerGas"))?,
            to,
            value: tx.value,
            access_list: tx.access_list.clone().unwrap_or_default(),
            input: tx.input.clone(),
        }
        .signature_hash(),
        SigningScheme::Typed { tx_type, .. } => return Err(RecoveryError::UnsupportedType(tx_type)),
    };

    Ok(hash)
}

/// Recovery id (y-parity) encoded in `v` under `scheme`.
fn recovery_id(tx: &RawTransaction, scheme: SigningScheme) -> Result<i32, RecoveryError> {
    let invalid = || RecoveryError::InvalidV(tx.v);
    let v = u64::try_from(tx.v).map_err(|_| invalid())?;
    let offset = match scheme {
        SigningScheme::Homestead => 27,
        SigningScheme::Eip155 { chain_id } => chain_id
            .checked_mul(2)
            .and_then(|doubled| doubled.checked_add(35))
            .ok_or_else(invalid)?,
        SigningScheme::Typed { .. } => 0,
    };

    match v.checked_sub(offset) {
        Some(0) => Ok(0),
        Some(1) => Ok(1),
        _ => Err(invalid()),
    }
}

/// Recovers the address that signed `tx`.
///
/// Pure: the result depends only on the signature fields, the signed payload
/// and the chain id the transaction is bound to.
pub fn recover_sender(tx: &RawTransaction) -> Result<Address, RecoveryError> {
    let scheme = signing_scheme(tx)?;
    let recovery_id = recovery_id(tx, scheme)?;

    if tx.r.is_zero() || tx.s.is_zero() {
        return Err(RecoveryError::ZeroSignatureValue);
    }
    if tx.s > SECP256K1N_HALF {
        return Err(RecoveryError::HighS);
    }

    let msg_hash = signing_hash(tx, scheme)?;

    // Construct recoverable signature: [r || s]
    let mut sig_bytes = [0u8; 64];
    sig_bytes[0..32].copy_from_slice(&tx.r.to_be_bytes::<32>());
    sig_bytes[32..64].copy_from_slice(&tx.s.to_be_bytes::<32>());

    let rec_sig =
        RecoverableSignature::from_compact(&sig_bytes, RecoveryId::from_i32(recovery_id)?)?;

    let message = Message::from_digest(msg_hash.0);
    let pubkey = SECP256K1.recover_ecdsa(&message, &rec_sig)?;

    // keccak256(pubkey)[12..32], skipping the 0x04 prefix
    let pubkey_bytes = pubkey.serialize_uncompressed();
    let hash = keccak256(&pubkey_bytes[1..]);
    Ok(Address::from_slice(&hash[12..]))
}
