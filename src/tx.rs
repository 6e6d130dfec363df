//! Transaction kinds, payload layouts and signed envelopes.
//!
//! The ledger knows exactly four transaction kinds. This module is the sole
//! dispatch point over them: every other component resolves a kind id, a wire
//! layout or an owner key through the [`TxKind`]/[`TxPayload`] pair and never
//! through ad-hoc inspection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{record_digest, serde_sig, Digest, PublicKeyBytes, SignatureBytes};
use crate::wire::{DecodeError, Reader, Writer};

/// Kind id of a transfer transaction.
pub const TX_TRANSFER_ID: u16 = 0;
/// Kind id of an issue-funds transaction.
pub const TX_ISSUE_ID: u16 = 1;
/// Kind id of a create-account transaction.
pub const TX_CREATE_ACCOUNT_ID: u16 = 2;
/// Kind id of a multi-transfer transaction.
pub const TX_MULTI_TRANSFER_ID: u16 = 3;

const TX_DOMAIN: &[u8] = b"LENS_TX";

/// A kind id outside the known transaction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown transaction kind {0}")]
pub struct UnknownKind(pub u16);

/// Closed set of transaction kinds understood by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    /// Move funds from one account to another.
    Transfer,
    /// Issue new funds to an account.
    Issue,
    /// Register a new account.
    CreateAccount,
    /// Move funds out of two source transactions in one envelope.
    MultiTransfer,
}

impl TxKind {
    /// Resolves a wire kind id.
    pub fn from_id(id: u16) -> Result<Self, UnknownKind> {
        match id {
            TX_TRANSFER_ID => Ok(Self::Transfer),
            TX_ISSUE_ID => Ok(Self::Issue),
            TX_CREATE_ACCOUNT_ID => Ok(Self::CreateAccount),
            TX_MULTI_TRANSFER_ID => Ok(Self::MultiTransfer),
            other => Err(UnknownKind(other)),
        }
    }

    /// Wire kind id of this variant.
    pub fn id(self) -> u16 {
        match self {
            Self::Transfer => TX_TRANSFER_ID,
            Self::Issue => TX_ISSUE_ID,
            Self::CreateAccount => TX_CREATE_ACCOUNT_ID,
            Self::MultiTransfer => TX_MULTI_TRANSFER_ID,
        }
    }
}

/// Transfer payload: spend against a referenced prior transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    /// Content hash of the prior transaction being spent.
    pub tx_hash: Digest,
    /// Sender; receives the change and signs the envelope.
    pub from: PublicKeyBytes,
    /// Receiver.
    pub to: PublicKeyBytes,
    /// Amount transferred.
    pub amount: u64,
    /// Balance the sender retains after the transfer.
    pub change: u64,
    /// Non-idempotence seed.
    pub seed: u64,
}

/// Issue payload: mint funds to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTx {
    /// Account receiving the issued funds; signs the envelope.
    pub pub_key: PublicKeyBytes,
    /// Issued amount.
    pub amount: u64,
    /// Non-idempotence seed.
    pub seed: u64,
}

/// Create-account payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountTx {
    /// Identity key of the new account; signs the envelope.
    pub pub_key: PublicKeyBytes,
    /// Display name.
    pub name: String,
}

/// Multi-transfer payload: two spends in one envelope, signed by `from1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTransferTx {
    /// Content hash of the prior transaction spent by the first leg.
    pub tx_hash1: Digest,
    /// Content hash of the prior transaction spent by the second leg.
    pub tx_hash2: Digest,
    /// First-leg sender; signs the envelope.
    pub from1: PublicKeyBytes,
    /// Second-leg sender.
    pub from2: PublicKeyBytes,
    /// First-leg receiver.
    pub to1: PublicKeyBytes,
    /// Second-leg receiver.
    pub to2: PublicKeyBytes,
    /// First-leg amount.
    pub amount1: u64,
    /// Second-leg amount.
    pub amount2: u64,
    /// First-leg sender's retained balance.
    pub change1: u64,
    /// Second-leg sender's retained balance.
    pub change2: u64,
    /// Non-idempotence seed.
    pub seed: u64,
}

/// Typed transaction payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// Transfer payload.
    Transfer(TransferTx),
    /// Issue payload.
    Issue(IssueTx),
    /// Create-account payload.
    CreateAccount(CreateAccountTx),
    /// Multi-transfer payload.
    MultiTransfer(MultiTransferTx),
}

impl TxPayload {
    /// Kind tag of this payload.
    pub fn kind(&self) -> TxKind {
        match self {
            Self::Transfer(_) => TxKind::Transfer,
            Self::Issue(_) => TxKind::Issue,
            Self::CreateAccount(_) => TxKind::CreateAccount,
            Self::MultiTransfer(_) => TxKind::MultiTransfer,
        }
    }

    /// Key whose signature authorises this payload.
    ///
    /// Exactly one owner exists per kind: the sender for transfers (the
    /// first leg for multi-transfers), the account key otherwise.
    pub fn owner(&self) -> &PublicKeyBytes {
        match self {
            Self::Transfer(tx) => &tx.from,
            Self::Issue(tx) => &tx.pub_key,
            Self::CreateAccount(tx) => &tx.pub_key,
            Self::MultiTransfer(tx) => &tx.from1,
        }
    }

    /// Encodes the payload fields into their canonical wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        match self {
            Self::Transfer(tx) => {
                writer.write_digest(&tx.tx_hash);
                writer.write_digest(&tx.from);
                writer.write_digest(&tx.to);
                writer.write_u64(tx.amount);
                writer.write_u64(tx.change);
                writer.write_u64(tx.seed);
            }
            Self::Issue(tx) => {
                writer.write_digest(&tx.pub_key);
                writer.write_u64(tx.amount);
                writer.write_u64(tx.seed);
            }
            Self::CreateAccount(tx) => {
                writer.write_digest(&tx.pub_key);
                writer.write_str(&tx.name);
            }
            Self::MultiTransfer(tx) => {
                writer.write_digest(&tx.tx_hash1);
                writer.write_digest(&tx.tx_hash2);
                writer.write_digest(&tx.from1);
                writer.write_digest(&tx.from2);
                writer.write_digest(&tx.to1);
                writer.write_digest(&tx.to2);
                writer.write_u64(tx.amount1);
                writer.write_u64(tx.amount2);
                writer.write_u64(tx.change1);
                writer.write_u64(tx.change2);
                writer.write_u64(tx.seed);
            }
        }
        writer.into_bytes()
    }

    /// Decodes a payload of the given kind, consuming the input exactly.
    pub fn decode(kind: TxKind, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let payload = match kind {
            TxKind::Transfer => Self::Transfer(TransferTx {
                tx_hash: reader.read_digest()?,
                from: reader.read_digest()?,
                to: reader.read_digest()?,
                amount: reader.read_u64()?,
                change: reader.read_u64()?,
                seed: reader.read_u64()?,
            }),
            TxKind::Issue => Self::Issue(IssueTx {
                pub_key: reader.read_digest()?,
                amount: reader.read_u64()?,
                seed: reader.read_u64()?,
            }),
            TxKind::CreateAccount => Self::CreateAccount(CreateAccountTx {
                pub_key: reader.read_digest()?,
                name: reader.read_str()?,
            }),
            TxKind::MultiTransfer => Self::MultiTransfer(MultiTransferTx {
                tx_hash1: reader.read_digest()?,
                tx_hash2: reader.read_digest()?,
                from1: reader.read_digest()?,
                from2: reader.read_digest()?,
                to1: reader.read_digest()?,
                to2: reader.read_digest()?,
                amount1: reader.read_u64()?,
                amount2: reader.read_u64()?,
                change1: reader.read_u64()?,
                change2: reader.read_u64()?,
                seed: reader.read_u64()?,
            }),
        };
        reader.finish()?;
        Ok(payload)
    }

    /// Message bytes that are hashed and signed: the kind id followed by the
    /// payload encoding. The kind prefix keeps content hashes injective
    /// across kinds.
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u16(self.kind().id());
        let mut bytes = writer.into_bytes();
        bytes.extend_from_slice(&self.encode());
        bytes
    }

    /// Content hash identifying this transaction on the ledger.
    pub fn content_hash(&self) -> Digest {
        record_digest(TX_DOMAIN, &self.message_bytes())
    }
}

/// Signed transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    /// Typed payload.
    pub payload: TxPayload,
    /// ed25519 signature by the payload owner over the message bytes.
    #[serde(with = "serde_sig")]
    pub signature: SignatureBytes,
}

impl SignedTx {
    /// Checks the envelope signature against the payload's owner key.
    ///
    /// An owner key that is not a valid ed25519 point counts as a failed
    /// signature, not a separate error.
    pub fn verify_signature(&self) -> bool {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let Ok(verifying) = VerifyingKey::from_bytes(self.payload.owner()) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature);
        verifying
            .verify(&self.payload.message_bytes(), &signature)
            .is_ok()
    }
}
