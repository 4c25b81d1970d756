use thiserror::Error;

use crate::amount::Amount;
use crate::ledger::SubmissionId;

pub type Result<T> = std::result::Result<T, CashError>;
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Failures reported by a ledger gateway, before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger rejected submission: {0}")]
    Rejected(String),

    /// A conditional write found a value other than the expected one.
    #[error("Write condition failed on key {key}")]
    ConditionFailed { key: String },

    /// The sender already has a submission carrying this lease.
    #[error("Lease {lease} already used by {existing}")]
    LeaseInUse { lease: String, existing: SubmissionId },
}

#[derive(Error, Debug)]
pub enum CashError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown code: {0}")]
    UnknownCode(String),

    #[error("Code already redeemed: {0}")]
    AlreadyRedeemed(String),

    #[error("Insufficient funds in {account}: need {needed}, have {available}")]
    InsufficientFunds {
        account: String,
        needed: Amount,
        available: Amount,
    },

    #[error("Insufficient liquidity: need {needed}, pool has {available}")]
    InsufficientLiquidity { needed: Amount, available: Amount },

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected submission: {0}")]
    LedgerRejected(String),

    /// The submission may or may not have been applied. Re-verify before retrying.
    #[error("Confirmation timed out for {0}, outcome unknown")]
    ConfirmationTimeout(SubmissionId),

    #[error("No unused code found after {0} attempts")]
    CodeCollision(u32),

    #[error("Corrupt ledger entry under {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("No pending redemption for {0}")]
    NotPending(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CashError {
    /// Only transient ledger failures are safe to retry unmodified.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CashError::LedgerUnavailable(_))
    }
}

impl From<LedgerError> for CashError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) => CashError::LedgerUnavailable(msg),
            LedgerError::Rejected(msg) => CashError::LedgerRejected(msg),
            LedgerError::ConditionFailed { key } => {
                CashError::LedgerRejected(format!("write condition failed on {}", key))
            }
            LedgerError::LeaseInUse { lease, existing } => CashError::LedgerRejected(format!(
                "lease {} already used by {}",
                lease, existing
            )),
        }
    }
}

impl From<algocash_net::NetError> for LedgerError {
    fn from(e: algocash_net::NetError) -> Self {
        if e.is_transient() {
            LedgerError::Unavailable(e.to_string())
        } else {
            LedgerError::Rejected(e.to_string())
        }
    }
}
