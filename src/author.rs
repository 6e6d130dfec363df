//! Transaction authoring and counterparty-aware change computation.
//!
//! Builders here produce signed envelopes ready for submission. A spend
//! always references one prior transaction; [`compute_change`] reads the
//! sender's spendable balance out of that prior transaction according to
//! the role the sender played in it, then subtracts the amount being sent.

use ed25519_dalek::SigningKey;
use thiserror::Error;

use crate::data::{Digest, PublicKeyBytes};
use crate::keys;
use crate::tx::{CreateAccountTx, IssueTx, MultiTransferTx, SignedTx, TransferTx, TxPayload};

/// Errors raised while authoring or attributing transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorError {
    /// The sender plays no role in the referenced prior transaction.
    #[error("sender is neither payer nor recipient of the referenced transaction")]
    WrongSender,
    /// The spend exceeds the balance the prior transaction grants.
    #[error("spend exceeds the sender's balance in the referenced transaction")]
    InsufficientBalance,
    /// The signing key does not own the envelope being built.
    #[error("signing key does not match the transaction owner")]
    NotEnvelopeOwner,
}

/// Signed envelope plus the content hash it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoredTx {
    /// The signed transaction ready for submission.
    pub envelope: SignedTx,
    /// Content hash identifying the transaction on the ledger.
    pub content_hash: Digest,
}

/// One leg of a two-party transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferLeg<'a> {
    /// Content hash of the prior transaction this leg spends.
    pub spent_hash: Digest,
    /// Paying account.
    pub from: PublicKeyBytes,
    /// Receiving account.
    pub to: PublicKeyBytes,
    /// Amount credited to the recipient.
    pub amount: u64,
    /// The prior transaction establishing the payer's balance.
    pub prior: &'a TxPayload,
}

/// Computes the change `sender` retains after spending `amount` against
/// `prior`.
///
/// The sender's balance in `prior` depends on the role played there: an
/// issue grants the beneficiary the full minted amount, a transfer grants
/// the recipient `amount` and the payer the declared `change`, and a
/// multi-transfer attributes each of its four roles independently, payer
/// legs first. A sender with no role in `prior` is an error rather than a
/// zero, and a spend past the balance is refused instead of wrapping.
pub fn compute_change(
    prior: &TxPayload,
    sender: &PublicKeyBytes,
    amount: u64,
) -> Result<u64, AuthorError> {
    let balance = match prior {
        TxPayload::Issue(tx) if tx.pub_key == *sender => tx.amount,
        TxPayload::MultiTransfer(tx) if tx.from1 == *sender => tx.change1,
        TxPayload::MultiTransfer(tx) if tx.from2 == *sender => tx.change2,
        TxPayload::MultiTransfer(tx) if tx.to1 == *sender => tx.amount1,
        TxPayload::MultiTransfer(tx) if tx.to2 == *sender => tx.amount2,
        TxPayload::Transfer(tx) if tx.from == *sender => tx.change,
        TxPayload::Transfer(tx) if tx.to == *sender => tx.amount,
        _ => return Err(AuthorError::WrongSender),
    };
    balance
        .checked_sub(amount)
        .ok_or(AuthorError::InsufficientBalance)
}

fn seal(payload: TxPayload, signer: &SigningKey) -> AuthoredTx {
    let content_hash = payload.content_hash();
    let signature = keys::sign_payload(signer, &payload.message_bytes()).to_bytes();
    AuthoredTx {
        envelope: SignedTx { payload, signature },
        content_hash,
    }
}

/// Draws a random anti-replay seed.
pub fn random_seed() -> u64 {
    rand::random()
}

/// Authors an account-creation envelope for the signing key.
pub fn create_account(signer: &SigningKey, name: &str) -> AuthoredTx {
    seal(
        TxPayload::CreateAccount(CreateAccountTx {
            pub_key: signer.verifying_key().to_bytes(),
            name: name.to_string(),
        }),
        signer,
    )
}

/// Authors an issue envelope minting `amount` to the signing key.
pub fn issue(signer: &SigningKey, amount: u64, seed: u64) -> AuthoredTx {
    seal(
        TxPayload::Issue(IssueTx {
            pub_key: signer.verifying_key().to_bytes(),
            amount,
            seed,
        }),
        signer,
    )
}

/// Authors a transfer spending `amount` out of the prior transaction
/// identified by `spent_hash`; the declared change follows from the signing
/// key's role in `prior`.
pub fn transfer(
    signer: &SigningKey,
    spent_hash: Digest,
    to: PublicKeyBytes,
    amount: u64,
    seed: u64,
    prior: &TxPayload,
) -> Result<AuthoredTx, AuthorError> {
    let from = signer.verifying_key().to_bytes();
    let change = compute_change(prior, &from, amount)?;
    Ok(seal(
        TxPayload::Transfer(TransferTx {
            tx_hash: spent_hash,
            from,
            to,
            amount,
            change,
            seed,
        }),
        signer,
    ))
}

/// Authors a two-leg transfer; the signing key must own the first leg.
///
/// Each leg spends its own prior transaction, so the two changes are
/// computed independently.
pub fn multi_transfer(
    signer: &SigningKey,
    leg1: TransferLeg<'_>,
    leg2: TransferLeg<'_>,
    seed: u64,
) -> Result<AuthoredTx, AuthorError> {
    if signer.verifying_key().to_bytes() != leg1.from {
        return Err(AuthorError::NotEnvelopeOwner);
    }
    let change1 = compute_change(leg1.prior, &leg1.from, leg1.amount)?;
    let change2 = compute_change(leg2.prior, &leg2.from, leg2.amount)?;
    Ok(seal(
        TxPayload::MultiTransfer(MultiTransferTx {
            tx_hash1: leg1.spent_hash,
            tx_hash2: leg2.spent_hash,
            from1: leg1.from,
            from2: leg2.from,
            to1: leg1.to,
            to2: leg2.to,
            amount1: leg1.amount,
            amount2: leg2.amount,
            change1,
            change2,
            seed,
        }),
        signer,
    ))
}
