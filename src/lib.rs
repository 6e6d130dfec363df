#![deny(missing_docs)]

//! # ledger_lens
//!
//! **Ledger-Lens** is a light-client verification library for a
//! proof-carrying account ledger. A thin client holds only the validator
//! set; everything else arrives as an untrusted server response and is
//! admitted solely on cryptographic evidence. The crate covers the full
//! trust path:
//!
//! * **Record codec**: the [`wire`] module defines the deterministic
//!   little-endian layout every hash and signature commits to, and [`data`]
//!   carries the typed records built on it (accounts, table keys, history
//!   metadata, block headers).
//! * **Transaction registry**: the [`tx`] module maps wire kind ids to
//!   typed payloads, computes domain-separated content hashes and checks
//!   owner signatures.
//! * **Proof verifier**: the [`proof`] module reconstructs roots from
//!   sparse map proofs and list range proofs without ever materialising
//!   the server's trees.
//! * **Verification pipeline**: [`verify::verify_account_response`] chains
//!   five stages from validator precommits down to individual transaction
//!   signatures; the first failure rejects the response with its stage tag.
//! * **Transaction authoring**: the [`author`] module builds signed
//!   envelopes and attributes balance movement per party via
//!   [`author::compute_change`].
//!
//! ## Usage
//!
//! ```rust
//! use ledger_lens::{author, keys};
//!
//! let alice = keys::derive_signing_key("alice");
//! let bob = keys::derive_signing_key("bob");
//!
//! // Mint 100 to alice, then send 40 of it to bob.
//! let minted = author::issue(&alice, 100, 1);
//! let sent = author::transfer(
//!     &alice,
//!     minted.content_hash,
//!     bob.verifying_key().to_bytes(),
//!     40,
//!     2,
//!     &minted.envelope.payload,
//! )
//! .unwrap();
//!
//! let alice_pk = alice.verifying_key().to_bytes();
//! assert!(sent.envelope.verify_signature());
//! // Alice kept 60 and could spend 10 more of it.
//! assert_eq!(author::compute_change(&sent.envelope.payload, &alice_pk, 10), Ok(50));
//! ```

pub mod author;
pub mod data;
pub mod keys;
pub mod proof;
pub mod tx;
pub mod verify;
pub mod wire;

pub use author::{compute_change, AuthorError, AuthoredTx, TransferLeg};
pub use data::{
    digest_from_hex, digest_to_hex, Account, BlockHeader, Digest, PublicKeyBytes, SignatureBytes,
    TableKey, TxMeta,
};
pub use proof::{ListProof, MapProof, ProofError};
pub use tx::{SignedTx, TxKind, TxPayload, UnknownKind};
pub use verify::{
    verify_account_response, AccountResponse, BlockProof, Precommit, Rejection, Stage,
    VerifiedResult, VerifyError,
};
pub use wire::{DecodeError, Reader, Writer};
