//! Five-stage verification pipeline over an untrusted account response.
//!
//! The pipeline chains block/validator verification, the table-location map
//! proof, the account map proof, the history range proof and the
//! per-transaction hash and signature checks. Each stage gates the next;
//! the first failure aborts the call with a [`Rejection`] carrying the stage
//! tag, and no partial result ever escapes. Proof failures are not
//! transient, so nothing here retries.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::data::{serde_sig, Account, BlockHeader, Digest, PublicKeyBytes, SignatureBytes, TableKey, TxMeta};
use crate::proof::{collect_range, empty_list_digest, ListProof, MapProof, ProofError};
use crate::tx::{SignedTx, TxKind, TxPayload, UnknownKind};
use crate::wire::{DecodeError, Reader};

/// Service identifier of the currency service.
pub const SERVICE_ID: u16 = 128;
/// Index of the account table within the currency service.
pub const ACCOUNT_TABLE_INDEX: u16 = 0;

/// Validator signature over a block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    /// Signing validator key.
    pub public_key: PublicKeyBytes,
    /// ed25519 signature over the block hash bytes.
    #[serde(with = "serde_sig")]
    pub signature: SignatureBytes,
}

/// Block header plus the precommit signatures claiming to finalise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProof {
    /// Claimed block header.
    pub header: BlockHeader,
    /// Validator precommits over the header's block hash.
    pub precommits: Vec<Precommit>,
}

/// Undecoded transaction envelope as transported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    /// Wire kind id; resolved through the transaction registry.
    pub kind_id: u16,
    /// Payload bytes in the kind's wire layout.
    pub body: Vec<u8>,
    /// ed25519 signature over the kind-prefixed payload bytes.
    #[serde(with = "serde_sig")]
    pub signature: SignatureBytes,
}

/// History range proof plus the transaction envelopes it should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBundle {
    /// Range proof over the account's full history; `None` for an account
    /// whose history is empty.
    pub proof: Option<ListProof>,
    /// Transaction envelopes in history order.
    pub transactions: Vec<RawTx>,
}

/// Complete untrusted payload answering an account query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponse {
    /// Block header and precommits.
    pub block_proof: BlockProof,
    /// Map proof binding the account-table root into the state root.
    pub table_proof: MapProof,
    /// Map proof binding the account record into the account-table root.
    pub account_proof: MapProof,
    /// History proof and transactions.
    pub history: HistoryBundle,
}

impl AccountResponse {
    /// Serialises the response to JSON text.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialises a response from JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

/// Pipeline stage at which a response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Block precommits against the validator set.
    Validators,
    /// Table-location proof against the state root.
    TableProof,
    /// Account proof against the account-table root.
    AccountProof,
    /// History range proof against the account's history root.
    HistoryProof,
    /// Per-transaction hash and signature checks.
    Transactions,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validators => "validator",
            Self::TableProof => "table-proof",
            Self::AccountProof => "account-proof",
            Self::HistoryProof => "history-proof",
            Self::Transactions => "transaction",
        };
        f.write_str(name)
    }
}

/// Reasons a stage can reject a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// A proof failed to reconstruct.
    #[error(transparent)]
    Proof(#[from] ProofError),
    /// A proven value failed to decode as its record type.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A transaction carried an unknown kind id.
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    /// A key that must be present was proven absent.
    #[error("{0} not found")]
    MissingEntry(&'static str),
    /// Too few valid precommits for the claimed block.
    #[error("block carries {valid} valid precommits of {validators} validators, needs a 2/3+ majority")]
    BlockSignatures {
        /// Valid distinct in-set precommits.
        valid: usize,
        /// Size of the validator set.
        validators: usize,
    },
    /// A transaction's recomputed content hash disagrees with the committed
    /// history metadata.
    #[error("transaction {index} content hash does not match committed history")]
    TxHashMismatch {
        /// Index of the failing transaction.
        index: usize,
    },
    /// A transaction's signature does not verify against its owner key.
    #[error("transaction {index} signature is invalid")]
    TxSignature {
        /// Index of the failing transaction.
        index: usize,
    },
    /// The server-sent transaction list disagrees with the proven history
    /// length.
    #[error("history proves {proven} entries, server sent {supplied} transactions")]
    HistoryLength {
        /// Entries the history proof covers.
        proven: u64,
        /// Envelopes the server supplied.
        supplied: u64,
    },
}

/// Stage-tagged rejection of an account response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verification rejected at {stage} stage: {reason}")]
pub struct Rejection {
    /// Stage that failed.
    pub stage: Stage,
    /// Why it failed.
    pub reason: VerifyError,
}

/// Fully verified view of an account and its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedResult {
    /// Verified block header.
    pub header: BlockHeader,
    /// Verified account record.
    pub account: Account,
    /// Verified transactions with their content hashes, in history order.
    pub transactions: Vec<(Digest, SignedTx)>,
}

fn reject<T>(stage: Stage, reason: impl Into<VerifyError>) -> Result<T, Rejection> {
    Err(Rejection {
        stage,
        reason: reason.into(),
    })
}

/// Counts distinct, in-set, correctly signing validators for the block.
fn check_block_proof(
    block_proof: &BlockProof,
    validators: &[PublicKeyBytes],
) -> Result<(), VerifyError> {
    let block_hash = block_proof.header.block_hash();
    let mut seen = HashSet::new();
    let mut valid = 0usize;
    for precommit in &block_proof.precommits {
        if !validators.contains(&precommit.public_key) {
            continue;
        }
        if !seen.insert(precommit.public_key) {
            continue;
        }
        let Ok(verifying) = VerifyingKey::from_bytes(&precommit.public_key) else {
            continue;
        };
        let signature = Signature::from_bytes(&precommit.signature);
        if verifying.verify(&block_hash, &signature).is_ok() {
            valid += 1;
        }
    }
    // Strict 2/3+ supermajority of the validator set.
    if valid * 3 > validators.len() * 2 {
        Ok(())
    } else {
        Err(VerifyError::BlockSignatures {
            valid,
            validators: validators.len(),
        })
    }
}

/// Decodes a proven map value as a bare 32-byte digest.
fn digest_value(bytes: &[u8]) -> Result<Digest, DecodeError> {
    let mut reader = Reader::new(bytes);
    let digest = reader.read_digest()?;
    reader.finish()?;
    Ok(digest)
}

/// Runs a map proof against an expected root, requiring it to target
/// `expected_key` and to prove presence.
fn require_entry<'a>(
    proof: &'a MapProof,
    expected_key: &Digest,
    expected_root: &Digest,
    what: &'static str,
) -> Result<&'a [u8], VerifyError> {
    if proof.key != *expected_key {
        return Err(ProofError::Malformed("map proof bound to the wrong key").into());
    }
    proof
        .check_against(expected_root)?
        .ok_or(VerifyError::MissingEntry(what))
}

/// Verifies an untrusted account response against the known validator set.
///
/// Returns the verified account state and transaction list only when every
/// stage passes; otherwise the first failure is reported with its stage tag
/// and nothing derived from the response should be used.
pub fn verify_account_response(
    response: &AccountResponse,
    account_key: &PublicKeyBytes,
    validators: &[PublicKeyBytes],
) -> Result<VerifiedResult, Rejection> {
    let header = &response.block_proof.header;

    // Stage 1: the block must be finalised by the known validator set.
    check_block_proof(&response.block_proof, validators)
        .or_else(|reason| reject(Stage::Validators, reason))?;

    // Stage 2: locate the account table's root inside the state map.
    let table_key = TableKey {
        service_id: SERVICE_ID,
        table_index: ACCOUNT_TABLE_INDEX,
    }
    .map_key();
    let table_root = require_entry(
        &response.table_proof,
        &table_key,
        &header.state_hash,
        "account table",
    )
    .and_then(|bytes| digest_value(bytes).map_err(VerifyError::from))
    .or_else(|reason| reject(Stage::TableProof, reason))?;

    // Stage 3: locate and decode the account record.
    let account = require_entry(
        &response.account_proof,
        account_key,
        &table_root,
        "account",
    )
    .and_then(|bytes| Account::decode(bytes).map_err(VerifyError::from))
    .or_else(|reason| reject(Stage::AccountProof, reason))?;

    // Stage 4: reconstruct the history metadata for the full history range.
    let history_len = account.history_len;
    let supplied = response.history.transactions.len() as u64;
    let metas: Vec<TxMeta> = if history_len == 0 {
        if account.history_hash != empty_list_digest() {
            return reject(
                Stage::HistoryProof,
                ProofError::RootMismatch {
                    expected: account.history_hash,
                    actual: empty_list_digest(),
                },
            );
        }
        Vec::new()
    } else {
        response
            .history
            .proof
            .as_ref()
            .ok_or(VerifyError::MissingEntry("history proof"))
            .and_then(|proof| {
                collect_range(proof, history_len, 0, history_len, &account.history_hash)
                    .map_err(VerifyError::from)
            })
            .and_then(|leaves| {
                leaves
                    .iter()
                    .map(|bytes| TxMeta::decode(bytes).map_err(VerifyError::from))
                    .collect()
            })
            .or_else(|reason| reject(Stage::HistoryProof, reason))?
    };
    if history_len != supplied {
        return reject(
            Stage::HistoryProof,
            VerifyError::HistoryLength {
                proven: history_len,
                supplied,
            },
        );
    }

    // Stage 5: every envelope must hash to its committed metadata and carry
    // a valid owner signature.
    let mut transactions = Vec::with_capacity(response.history.transactions.len());
    for (index, raw) in response.history.transactions.iter().enumerate() {
        let payload = TxKind::from_id(raw.kind_id)
            .map_err(VerifyError::from)
            .and_then(|kind| TxPayload::decode(kind, &raw.body).map_err(VerifyError::from))
            .or_else(|reason| reject(Stage::Transactions, reason))?;
        let content_hash = payload.content_hash();
        if content_hash != metas[index].tx_hash {
            return reject(Stage::Transactions, VerifyError::TxHashMismatch { index });
        }
        let envelope = SignedTx {
            payload,
            signature: raw.signature,
        };
        if !envelope.verify_signature() {
            return reject(Stage::Transactions, VerifyError::TxSignature { index });
        }
        transactions.push((content_hash, envelope));
    }

    Ok(VerifiedResult {
        header: *header,
        account,
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::proof::{ListTree, MapTree};
    use crate::tx::IssueTx;
    use ed25519_dalek::SigningKey;

    struct Fixture {
        response: AccountResponse,
        account_key: PublicKeyBytes,
        validators: Vec<PublicKeyBytes>,
    }

    fn fixture(validator_count: usize, signing_count: usize) -> Fixture {
        let owner: SigningKey = keys::derive_signing_key("fixture-owner");
        let owner_pk = owner.verifying_key().to_bytes();

        let payload = TxPayload::Issue(IssueTx {
            pub_key: owner_pk,
            amount: 100,
            seed: 1,
        });
        let raw = RawTx {
            kind_id: payload.kind().id(),
            body: payload.encode(),
            signature: keys::sign_payload(&owner, &payload.message_bytes()).to_bytes(),
        };

        let mut history = ListTree::new();
        history.push(
            TxMeta {
                tx_hash: payload.content_hash(),
                execution_status: true,
            }
            .encode(),
        );

        let account = Account {
            pub_key: owner_pk,
            name: "fixture".to_string(),
            balance: 100,
            history_len: history.len(),
            history_hash: history.root(),
            used: Vec::new(),
        };

        let mut account_table = MapTree::new();
        account_table.insert(owner_pk, account.encode());

        let table_key = TableKey {
            service_id: SERVICE_ID,
            table_index: ACCOUNT_TABLE_INDEX,
        }
        .map_key();
        let mut state = MapTree::new();
        state.insert(table_key, account_table.root().to_vec());

        let header = BlockHeader {
            height: 3,
            prev_hash: [1u8; 32],
            tx_hash: [2u8; 32],
            state_hash: state.root(),
        };
        let block_hash = header.block_hash();

        let validator_keys: Vec<SigningKey> = (0..validator_count)
            .map(|i| keys::derive_signing_key(&format!("validator-{i}")))
            .collect();
        let validators: Vec<PublicKeyBytes> = validator_keys
            .iter()
            .map(|key| key.verifying_key().to_bytes())
            .collect();
        let precommits = validator_keys
            .iter()
            .take(signing_count)
            .map(|key| Precommit {
                public_key: key.verifying_key().to_bytes(),
                signature: keys::sign_payload(key, &block_hash).to_bytes(),
            })
            .collect();

        Fixture {
            response: AccountResponse {
                block_proof: BlockProof { header, precommits },
                table_proof: state.proof(&table_key),
                account_proof: account_table.proof(&owner_pk),
                history: HistoryBundle {
                    proof: history.range_proof(0, 1),
                    transactions: vec![raw],
                },
            },
            account_key: owner_pk,
            validators,
        }
    }

    fn empty_history_fixture(history_hash: Digest) -> Fixture {
        let owner: SigningKey = keys::derive_signing_key("fixture-newborn");
        let owner_pk = owner.verifying_key().to_bytes();

        let account = Account {
            pub_key: owner_pk,
            name: "newborn".to_string(),
            balance: 0,
            history_len: 0,
            history_hash,
            used: Vec::new(),
        };

        let mut account_table = MapTree::new();
        account_table.insert(owner_pk, account.encode());

        let table_key = TableKey {
            service_id: SERVICE_ID,
            table_index: ACCOUNT_TABLE_INDEX,
        }
        .map_key();
        let mut state = MapTree::new();
        state.insert(table_key, account_table.root().to_vec());

        let header = BlockHeader {
            height: 1,
            prev_hash: [1u8; 32],
            tx_hash: [2u8; 32],
            state_hash: state.root(),
        };
        let block_hash = header.block_hash();

        let validator_keys: Vec<SigningKey> = (0..4)
            .map(|i| keys::derive_signing_key(&format!("validator-{i}")))
            .collect();
        let validators: Vec<PublicKeyBytes> = validator_keys
            .iter()
            .map(|key| key.verifying_key().to_bytes())
            .collect();
        let precommits = validator_keys
            .iter()
            .take(3)
            .map(|key| Precommit {
                public_key: key.verifying_key().to_bytes(),
                signature: keys::sign_payload(key, &block_hash).to_bytes(),
            })
            .collect();

        Fixture {
            response: AccountResponse {
                block_proof: BlockProof { header, precommits },
                table_proof: state.proof(&table_key),
                account_proof: account_table.proof(&owner_pk),
                history: HistoryBundle {
                    proof: None,
                    transactions: Vec::new(),
                },
            },
            account_key: owner_pk,
            validators,
        }
    }

    #[test]
    fn consistent_response_verifies() {
        let fx = fixture(4, 3);
        let result =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap();
        assert_eq!(result.account.balance, 100);
        assert_eq!(result.transactions.len() as u64, result.account.history_len);
    }

    #[test]
    fn empty_history_account_verifies() {
        let fx = empty_history_fixture(empty_list_digest());
        let result =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap();
        assert_eq!(result.account.history_len, 0);
        assert!(result.transactions.is_empty());
    }

    #[test]
    fn empty_history_requires_the_empty_digest() {
        let fx = empty_history_fixture([9u8; 32]);
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::HistoryProof);
        assert_eq!(
            rejection.reason,
            VerifyError::Proof(ProofError::RootMismatch {
                expected: [9u8; 32],
                actual: empty_list_digest(),
            })
        );
    }

    #[test]
    fn nonempty_history_requires_a_proof() {
        let mut fx = fixture(4, 3);
        fx.response.history.proof = None;
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::HistoryProof);
        assert_eq!(
            rejection.reason,
            VerifyError::MissingEntry("history proof")
        );
    }

    #[test]
    fn empty_history_rejects_supplied_transactions() {
        let mut fx = empty_history_fixture(empty_list_digest());
        let ghost = keys::derive_signing_key("fixture-ghost");
        let payload = TxPayload::Issue(IssueTx {
            pub_key: ghost.verifying_key().to_bytes(),
            amount: 5,
            seed: 2,
        });
        fx.response.history.transactions.push(RawTx {
            kind_id: payload.kind().id(),
            body: payload.encode(),
            signature: keys::sign_payload(&ghost, &payload.message_bytes()).to_bytes(),
        });
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::HistoryProof);
        assert_eq!(
            rejection.reason,
            VerifyError::HistoryLength {
                proven: 0,
                supplied: 1
            }
        );
    }

    #[test]
    fn quorum_boundary_with_four_validators() {
        // 2 of 4 is not a strict 2/3 majority; 3 of 4 is.
        let fx = fixture(4, 2);
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::Validators);
        assert_eq!(
            rejection.reason,
            VerifyError::BlockSignatures {
                valid: 2,
                validators: 4
            }
        );

        let fx = fixture(4, 3);
        assert!(verify_account_response(&fx.response, &fx.account_key, &fx.validators).is_ok());
    }

    #[test]
    fn duplicate_precommits_do_not_stack() {
        let mut fx = fixture(4, 2);
        let dup = fx.response.block_proof.precommits[0].clone();
        fx.response.block_proof.precommits.push(dup);
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::Validators);
    }

    #[test]
    fn unknown_kind_rejects_at_transaction_stage() {
        let mut fx = fixture(4, 3);
        fx.response.history.transactions[0].kind_id = 9;
        let rejection =
            verify_account_response(&fx.response, &fx.account_key, &fx.validators).unwrap_err();
        assert_eq!(rejection.stage, Stage::Transactions);
        assert_eq!(rejection.reason, VerifyError::UnknownKind(UnknownKind(9)));
    }

    #[test]
    fn missing_account_rejects_at_account_stage() {
        let fx = fixture(4, 3);
        let other = keys::derive_signing_key("stranger").verifying_key().to_bytes();
        let rejection =
            verify_account_response(&fx.response, &other, &fx.validators).unwrap_err();
        // The proof in the response targets the fixture account, not the
        // stranger, so the key binding check trips first.
        assert_eq!(rejection.stage, Stage::AccountProof);
    }

    #[test]
    fn verdict_is_deterministic() {
        let fx = fixture(4, 3);
        let first = verify_account_response(&fx.response, &fx.account_key, &fx.validators);
        let second = verify_account_response(&fx.response, &fx.account_key, &fx.validators);
        assert_eq!(first, second);
    }
}
