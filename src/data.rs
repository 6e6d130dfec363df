//! Core ledger value types and digest helpers.
//!
//! The records here are the typed shapes the light client decodes out of a
//! server response: the account record, the table-location key, the
//! per-transaction history metadata and the block header. Each carries its
//! canonical wire encoding; every hash and signature in the crate commits to
//! those bytes, never to a JSON rendering.

use blake2::digest::{consts::U32, Digest as _};
use blake2::Blake2b;
use serde::{Deserialize, Serialize};

use crate::wire::{DecodeError, Reader, Writer};

/// 32-byte BLAKE2b-256 digest.
pub type Digest = [u8; 32];

/// 32-byte ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

/// 64-byte ed25519 signature.
pub type SignatureBytes = [u8; 64];

const TABLE_KEY_DOMAIN: &[u8] = b"LENS_TABLE";
const BLOCK_DOMAIN: &[u8] = b"LENS_BLOCK";

/// Computes a domain-separated BLAKE2b-256 digest over a record encoding.
pub(crate) fn record_digest(domain: &[u8], bytes: &[u8]) -> Digest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(domain);
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encodes a digest as lowercase hex.
pub fn digest_to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

/// Parses a digest from hex text.
pub fn digest_from_hex(input: &str) -> Result<Digest, String> {
    let bytes = hex::decode(input).map_err(|err| format!("invalid digest hex: {err}"))?;
    if bytes.len() != 32 {
        return Err(format!("digest must be 32 bytes, got {}", bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Serde adapter storing a 64-byte signature as a hex string.
pub mod serde_sig {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SignatureBytes;

    /// Serialises the signature as lowercase hex.
    pub fn serialize<S: Serializer>(sig: &SignatureBytes, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(sig))
    }

    /// Parses a signature from hex text.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SignatureBytes, D::Error> {
        let text = String::deserialize(de)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))
    }
}

/// Ledger account record bound into the account table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identity public key; also the account's map key.
    pub pub_key: PublicKeyBytes,
    /// Display name.
    pub name: String,
    /// Spendable balance.
    pub balance: u64,
    /// Number of transactions in the account's history.
    pub history_len: u64,
    /// Root digest committing to the account's history list.
    pub history_hash: Digest,
    /// Content hashes already spent against this account.
    pub used: Vec<Digest>,
}

impl Account {
    /// Encodes the record into its canonical wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_digest(&self.pub_key);
        writer.write_str(&self.name);
        writer.write_u64(self.balance);
        writer.write_u64(self.history_len);
        writer.write_digest(&self.history_hash);
        writer.write_digest_seq(&self.used);
        writer.into_bytes()
    }

    /// Decodes the record, requiring the input to be consumed exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let account = Self {
            pub_key: reader.read_digest()?,
            name: reader.read_str()?,
            balance: reader.read_u64()?,
            history_len: reader.read_u64()?,
            history_hash: reader.read_digest()?,
            used: reader.read_digest_seq()?,
        };
        reader.finish()?;
        Ok(account)
    }
}

/// Structured key locating a service table inside the global state map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableKey {
    /// Identifier of the owning service.
    pub service_id: u16,
    /// Index of the table within the service.
    pub table_index: u16,
}

impl TableKey {
    /// Encodes the key into its canonical wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u16(self.service_id);
        writer.write_u16(self.table_index);
        writer.into_bytes()
    }

    /// Digest of the encoded key, used as the map key in the state tree.
    pub fn map_key(&self) -> Digest {
        record_digest(TABLE_KEY_DOMAIN, &self.encode())
    }
}

/// Per-transaction metadata committed into an account's history list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    /// Content hash of the transaction.
    pub tx_hash: Digest,
    /// Whether the ledger executed the transaction successfully.
    pub execution_status: bool,
}

impl TxMeta {
    /// Encodes the record into its canonical wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_digest(&self.tx_hash);
        writer.write_bool(self.execution_status);
        writer.into_bytes()
    }

    /// Decodes the record, requiring the input to be consumed exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let meta = Self {
            tx_hash: reader.read_digest()?,
            execution_status: reader.read_bool()?,
        };
        reader.finish()?;
        Ok(meta)
    }
}

/// Block header committing to the ledger state at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub height: u64,
    /// Digest of the previous block.
    pub prev_hash: Digest,
    /// Root digest of the block's transactions.
    pub tx_hash: Digest,
    /// Root digest of the global state map after this block.
    pub state_hash: Digest,
}

impl BlockHeader {
    /// Encodes the header into its canonical wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u64(self.height);
        writer.write_digest(&self.prev_hash);
        writer.write_digest(&self.tx_hash);
        writer.write_digest(&self.state_hash);
        writer.into_bytes()
    }

    /// Digest the validators co-sign for this block.
    pub fn block_hash(&self) -> Digest {
        record_digest(BLOCK_DOMAIN, &self.encode())
    }
}
